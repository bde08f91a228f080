use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::result::EvaluationOutcome;

/// Policy deciding whether temp outputs replace their targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputBehavior {
    #[default]
    DontOverwriteIfEvaluationFails,
    ScriptControlsOutput,
    NeverGenerateOutput,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BehaviorError {
    #[error("Only one output behavior can be selected")]
    Conflicting,

    #[error("Unknown output behavior: {0}")]
    Unknown(String),
}

impl OutputBehavior {
    pub const ALL: [OutputBehavior; 3] = [
        OutputBehavior::DontOverwriteIfEvaluationFails,
        OutputBehavior::ScriptControlsOutput,
        OutputBehavior::NeverGenerateOutput,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            OutputBehavior::DontOverwriteIfEvaluationFails => "Don't overwrite if evaluation fails",
            OutputBehavior::ScriptControlsOutput => "Script controls output",
            OutputBehavior::NeverGenerateOutput => "Never generate output",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            OutputBehavior::DontOverwriteIfEvaluationFails => {
                "Outputs replace their targets only when the script compiles and runs without errors"
            }
            OutputBehavior::ScriptControlsOutput => {
                "Outputs always replace their targets; the script decides what to keep"
            }
            OutputBehavior::NeverGenerateOutput => "Outputs are discarded and targets are never touched",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputBehavior::DontOverwriteIfEvaluationFails => "dont-overwrite-if-evaluation-fails",
            OutputBehavior::ScriptControlsOutput => "script-controls-output",
            OutputBehavior::NeverGenerateOutput => "never-generate-output",
        }
    }

    /// Map the mutually exclusive command-line switches to a behavior
    pub fn from_flags(
        dont_overwrite_on_failure: bool,
        never_generate: bool,
        script_controls: bool,
    ) -> Result<Option<Self>, BehaviorError> {
        let selected: Vec<OutputBehavior> = [
            (dont_overwrite_on_failure, OutputBehavior::DontOverwriteIfEvaluationFails),
            (never_generate, OutputBehavior::NeverGenerateOutput),
            (script_controls, OutputBehavior::ScriptControlsOutput),
        ]
        .into_iter()
        .filter_map(|(set, behavior)| set.then_some(behavior))
        .collect();

        match selected.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(*one)),
            _ => Err(BehaviorError::Conflicting),
        }
    }

    /// Whether outputs of an evaluation with `outcome` are promoted
    pub fn should_promote(&self, outcome: EvaluationOutcome) -> bool {
        match self {
            OutputBehavior::DontOverwriteIfEvaluationFails => outcome == EvaluationOutcome::Succeeded,
            OutputBehavior::ScriptControlsOutput => true,
            OutputBehavior::NeverGenerateOutput => false,
        }
    }
}

impl fmt::Display for OutputBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputBehavior {
    type Err = BehaviorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        OutputBehavior::ALL
            .into_iter()
            .find(|b| b.as_str() == wanted || b.as_str().replace('-', "") == wanted)
            .ok_or_else(|| BehaviorError::Unknown(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_dont_overwrite() {
        assert_eq!(
            OutputBehavior::default(),
            OutputBehavior::DontOverwriteIfEvaluationFails
        );
    }

    #[test]
    fn test_flags_are_mutually_exclusive() {
        assert_eq!(OutputBehavior::from_flags(false, false, false), Ok(None));
        assert_eq!(
            OutputBehavior::from_flags(false, true, false),
            Ok(Some(OutputBehavior::NeverGenerateOutput))
        );
        assert_eq!(
            OutputBehavior::from_flags(true, false, true),
            Err(BehaviorError::Conflicting)
        );
    }

    #[test]
    fn test_gating_table() {
        use EvaluationOutcome::*;
        let dont = OutputBehavior::DontOverwriteIfEvaluationFails;
        assert!(dont.should_promote(Succeeded));
        assert!(!dont.should_promote(CompileFailed));
        assert!(!dont.should_promote(RuntimeFailed));
        for outcome in [Succeeded, CompileFailed, RuntimeFailed] {
            assert!(OutputBehavior::ScriptControlsOutput.should_promote(outcome));
            assert!(!OutputBehavior::NeverGenerateOutput.should_promote(outcome));
        }
    }

    #[test]
    fn test_parse_and_metadata() {
        assert_eq!(
            "script_controls_output".parse::<OutputBehavior>(),
            Ok(OutputBehavior::ScriptControlsOutput)
        );
        assert_eq!(
            "NeverGenerateOutput".parse::<OutputBehavior>(),
            Ok(OutputBehavior::NeverGenerateOutput)
        );
        assert!("sometimes".parse::<OutputBehavior>().is_err());
        for behavior in OutputBehavior::ALL {
            assert!(!behavior.display_name().is_empty());
            assert!(!behavior.description().is_empty());
        }
    }
}
