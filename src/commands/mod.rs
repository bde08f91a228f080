pub mod directives;
pub mod extract;
pub mod generate;
pub mod init;

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Normal = 0,
    UnhandledError = 1,
    CommandLineError = 2,
    EvaluationError = 3,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}
