//! The external unpacker executables a session drives.

use std::path::PathBuf;
use tokio::process::Command;

/// Two-operation capability over the external unpacker.
///
/// Implementations return configured but unspawned commands; the session
/// owns stdio wiring and process lifetime. Substituting an implementation
/// (e.g. shell scripts in tests) changes nothing in the controller.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so sessions can run on any task.
pub trait UnpackerTool: Send + Sync {
    /// Command that pulls package data from the remote origin and writes a
    /// raw binary feed to stdout.
    fn producer(&self) -> Command;

    /// Command that reads a raw binary feed on stdin and writes one JSON
    /// record per line to stdout.
    fn transformer(&self) -> Command;
}

/// Default location of the unpacker jar.
pub const DEFAULT_UNPACKER_JAR: &str = "/unpacker/cli/unpacker.jar";

/// Default Wine wrapper handed to the producer.
pub const DEFAULT_WINE_COMMAND: &str = "/usr/bin/wine64 %UNPACKER_COMMAND%";

/// The Java unpacker CLI.
///
/// Producer: `java -jar <jar> --verbose --source UPDATER --output BINARY --wine-cmd <cmd>`
///
/// Transformer: `java -jar <jar> --verbose --source BINARY --output RECORDS`
#[derive(Debug, Clone)]
pub struct UnpackerCli {
    /// Java launcher
    pub java: PathBuf,

    /// Unpacker jar
    pub jar: PathBuf,

    /// Wine command template; `%UNPACKER_COMMAND%` is substituted by the tool
    pub wine_command: Option<String>,

    /// Pass `--verbose` to both processes
    pub verbose: bool,
}

impl Default for UnpackerCli {
    fn default() -> Self {
        Self {
            java: PathBuf::from("java"),
            jar: PathBuf::from(DEFAULT_UNPACKER_JAR),
            wine_command: Some(DEFAULT_WINE_COMMAND.to_string()),
            verbose: true,
        }
    }
}

impl UnpackerCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_java(mut self, java: impl Into<PathBuf>) -> Self {
        self.java = java.into();
        self
    }

    pub fn with_jar(mut self, jar: impl Into<PathBuf>) -> Self {
        self.jar = jar.into();
        self
    }

    /// Sets the Wine command template, or `None` to run natively.
    pub fn with_wine_command(mut self, command: Option<String>) -> Self {
        self.wine_command = command;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn base_command(&self, source: &str, output: &str) -> Command {
        let mut command = Command::new(&self.java);
        command.arg("-jar").arg(&self.jar);
        if self.verbose {
            command.arg("--verbose");
        }
        command.args(["--source", source, "--output", output]);
        command
    }
}

impl UnpackerTool for UnpackerCli {
    fn producer(&self) -> Command {
        let mut command = self.base_command("UPDATER", "BINARY");
        if let Some(wine) = &self.wine_command {
            command.arg("--wine-cmd").arg(wine);
        }
        command
    }

    fn transformer(&self) -> Command {
        self.base_command("BINARY", "RECORDS")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_default_producer_args() {
        let cli = UnpackerCli::default();
        let producer = cli.producer();

        assert_eq!(producer.as_std().get_program(), "java");
        assert_eq!(
            args(&producer),
            vec![
                "-jar",
                DEFAULT_UNPACKER_JAR,
                "--verbose",
                "--source",
                "UPDATER",
                "--output",
                "BINARY",
                "--wine-cmd",
                DEFAULT_WINE_COMMAND,
            ]
        );
    }

    #[test]
    fn test_default_transformer_args() {
        let cli = UnpackerCli::default();
        assert_eq!(
            args(&cli.transformer()),
            vec![
                "-jar",
                DEFAULT_UNPACKER_JAR,
                "--verbose",
                "--source",
                "BINARY",
                "--output",
                "RECORDS",
            ]
        );
    }

    #[test]
    fn test_builder_overrides() {
        let cli = UnpackerCli::new()
            .with_java("/opt/jdk/bin/java")
            .with_jar("/srv/unpacker.jar")
            .with_wine_command(None)
            .with_verbose(false);

        let producer = cli.producer();
        assert_eq!(producer.as_std().get_program(), "/opt/jdk/bin/java");
        assert_eq!(
            args(&producer),
            vec!["-jar", "/srv/unpacker.jar", "--source", "UPDATER", "--output", "BINARY"]
        );
    }
}
