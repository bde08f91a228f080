use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How a generated file is treated when it is fed back into the project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BuildAction {
    /// Only generate the file, do not add it to the project
    GenerateOnly,
    /// Add the file to the project without a build action
    #[default]
    None,
    /// Add the file to the project as compiled source
    Compile,
    /// Add the file to the project as content
    Content,
    /// Add the file to the project as an embedded resource
    EmbeddedResource,
}

impl BuildAction {
    /// Infer the build action from a target path (`.cs` compiles, everything else is `None`)
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("cs") => BuildAction::Compile,
            _ => BuildAction::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildAction::GenerateOnly => "GenerateOnly",
            BuildAction::None => "None",
            BuildAction::Compile => "Compile",
            BuildAction::Content => "Content",
            BuildAction::EmbeddedResource => "EmbeddedResource",
        }
    }
}

impl fmt::Display for BuildAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "generateonly" => Ok(BuildAction::GenerateOnly),
            "none" => Ok(BuildAction::None),
            "compile" => Ok(BuildAction::Compile),
            "content" => Ok(BuildAction::Content),
            "embeddedresource" => Ok(BuildAction::EmbeddedResource),
            _ => Err(format!("Unknown build action: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inferred_from_extension() {
        assert_eq!(BuildAction::for_path(Path::new("/p/a.cs")), BuildAction::Compile);
        assert_eq!(BuildAction::for_path(Path::new("/p/a.CS")), BuildAction::Compile);
        assert_eq!(BuildAction::for_path(Path::new("/p/a.json")), BuildAction::None);
        assert_eq!(BuildAction::for_path(Path::new("/p/noext")), BuildAction::None);
    }

    #[test]
    fn test_parse_accepts_kebab_and_pascal_case() {
        assert_eq!(
            "embedded-resource".parse::<BuildAction>().unwrap(),
            BuildAction::EmbeddedResource
        );
        assert_eq!(
            "GenerateOnly".parse::<BuildAction>().unwrap(),
            BuildAction::GenerateOnly
        );
        assert!("link".parse::<BuildAction>().is_err());
    }
}
