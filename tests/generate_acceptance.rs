//! Acceptance tests for scriptgen generation
//!
//! These tests run the binary end to end against small shell scripts, which the default process
//! host runs with `sh`.
#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to set up a test project
struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    fn new() -> Self {
        let project = Self {
            temp_dir: TempDir::new().unwrap(),
        };
        project.create_file("App.csproj", "<Project Sdk=\"Microsoft.NET.Sdk\" />\n");
        project
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn project_file(&self) -> PathBuf {
        self.path().join("App.csproj")
    }

    fn scriptgen(&self) -> Command {
        let mut cmd = Command::new(std::env!("CARGO_BIN_EXE_scriptgen"));
        cmd.current_dir(self.path())
            .env("SCRIPTGEN_CONFIG_HOME", self.path().join(".no-global-config"))
            .env("SCRIPTGEN_LOG_FORMAT", "compact")
            .env_remove("SCRIPTGEN_CONFIG")
            .env_remove("SCRIPTGEN_RUNTIME")
            .env_remove("RUST_LOG");
        cmd
    }

    fn generate(&self) -> Command {
        let mut cmd = self.scriptgen();
        cmd.arg("generate").arg(self.project_file());
        cmd
    }

    fn create_file(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.path().join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&file_path, content).unwrap();
        file_path
    }

    fn read(&self, path: &str) -> String {
        fs::read_to_string(self.path().join(path)).unwrap()
    }

    fn exists(&self, path: &str) -> bool {
        self.path().join(path).exists()
    }

    fn leftover_temp_files(&self) -> Vec<PathBuf> {
        walkdir::WalkDir::new(self.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                let name = p.to_string_lossy();
                name.ends_with(".scriptgentmp") || name.contains(".rewrite.")
            })
            .collect()
    }
}

#[test]
fn test_generates_default_output_and_prints_record() {
    let project = TestProject::new();
    project.create_file(
        "Models.csx",
        "echo 'namespace App {'\necho '##scriptgen: indent'\necho 'public partial class Model {}'\necho '##scriptgen: dedent'\necho '}'\n",
    );

    project
        .generate()
        .arg("Models.csx")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "Compile|{}",
            project.path().join("Models.cs").display()
        )));

    assert_eq!(
        project.read("Models.cs"),
        "namespace App {\n    public partial class Model {}\n}\n"
    );
    assert!(project.leftover_temp_files().is_empty());
}

#[test]
fn test_failed_script_keeps_previous_output() {
    let project = TestProject::new();
    project.create_file("Models.cs", "// previous\n");
    project.create_file("Models.csx", "echo 'half written'\necho 'database offline' >&2\nexit 1\n");

    project
        .generate()
        .arg("Models.csx")
        .assert()
        .code(3)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("error: Script exited with code 1"));

    assert_eq!(project.read("Models.cs"), "// previous\n");
    assert!(project.leftover_temp_files().is_empty());
}

#[test]
fn test_script_controls_output_keeps_partial_output() {
    let project = TestProject::new();
    project.create_file("Models.cs", "// previous\n");
    project.create_file("Models.csx", "echo 'half written'\nexit 1\n");

    project
        .generate()
        .arg("Models.csx")
        .arg("--outscr")
        .assert()
        .code(3);

    assert_eq!(project.read("Models.cs"), "half written\n");
}

#[test]
fn test_never_generate_output() {
    let project = TestProject::new();
    project.create_file("Models.csx", "echo 'class Model {}'\n");

    project
        .generate()
        .arg("Models.csx")
        .arg("--outnev")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    assert!(!project.exists("Models.cs"));
    assert!(project.leftover_temp_files().is_empty());
}

#[test]
fn test_conflicting_output_behaviors_are_a_command_line_error() {
    let project = TestProject::new();
    project.create_file("Models.csx", "echo x\n");

    project
        .generate()
        .arg("Models.csx")
        .arg("--outnoc")
        .arg("--outscr")
        .assert()
        .code(2);

    assert!(!project.exists("Models.cs"));
}

#[test]
fn test_named_outputs_and_keep_flag() {
    let project = TestProject::new();
    project.create_file(
        "Schema.csx",
        "\
echo '##scriptgen: output generated/schema.json'
echo '{}'
echo '##scriptgen: output scratch.txt'
echo 'temporary'
echo '##scriptgen: keep false'
",
    );

    let assert = project.generate().arg("Schema.csx").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();

    assert_eq!(project.read("generated/schema.json"), "{}\n");
    assert!(!project.exists("scratch.txt"));
    // The default stream was never written to
    assert!(!project.exists("Schema.cs"));
    assert_eq!(stdout.lines().count(), 1);
    assert!(stdout.starts_with("None|"));
}

#[test]
fn test_scripts_are_discovered_when_none_are_given() {
    let project = TestProject::new();
    project.create_file("A.csx", "echo a\n");
    project.create_file("nested/B.csx", "echo b\n");
    project.create_file("obj/C.csx", "echo c\n");

    project.generate().assert().success();

    assert_eq!(project.read("A.cs"), "a\n");
    assert_eq!(project.read("nested/B.cs"), "b\n");
    assert!(!project.exists("obj/C.cs"));
}

#[test]
fn test_settings_from_stdin() {
    let project = TestProject::new();
    project.create_file("Config.csx", "echo \"$SCRIPTGEN_PROPERTY_ROOTNAMESPACE\"\n");
    let settings = serde_json::json!({
        "ProjectFilePath": project.project_file(),
        "ScriptFilePaths": ["Config.csx"],
        "Properties": { "RootNamespace": "Contoso.App" }
    });

    project
        .scriptgen()
        .arg("generate")
        .write_stdin(settings.to_string())
        .assert()
        .success();

    assert_eq!(project.read("Config.cs"), "Contoso.App\n");
}

#[test]
fn test_missing_settings_are_a_command_line_error() {
    let project = TestProject::new();

    project
        .scriptgen()
        .arg("generate")
        .write_stdin("")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("stdin"));
}

#[test]
fn test_properties_and_messages() {
    let project = TestProject::new();
    project.create_file(
        "Props.csx",
        "echo \"$SCRIPTGEN_PROPERTY_CONFIGURATION\"\necho 'Warning|deprecated input' >&2\n",
    );

    project
        .generate()
        .arg("Props.csx")
        .args(["-p", "Configuration=Release", "--messages"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Warning|deprecated input"));

    assert_eq!(project.read("Props.cs"), "Release\n");
}

#[test]
fn test_unresolved_load_is_reported_at_the_directive() {
    let project = TestProject::new();
    project.create_file("Models.cs", "// previous\n");
    project.create_file("Models.csx", "#load \"Missing.cs\"\necho 'class Model {}'\n");

    project
        .generate()
        .arg("Models.csx")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Models.csx(1,1): error:"))
        .stderr(predicate::str::contains("Missing.cs"));

    assert_eq!(project.read("Models.cs"), "// previous\n");
}

#[test]
fn test_loaded_class_files_are_rewritten_for_the_script() {
    let project = TestProject::new();
    project.create_file(
        "Domain/Customer.cs",
        "namespace Contoso.Domain\n{\n    using System.Data;\n\n    public class Customer\n    {\n        public int Id { get; set; }\n    }\n}\n",
    );
    project.create_file("Dump.csx", "#load \"Domain/Customer.cs\"\ncat \"$SCRIPTGEN_LOADS\"\n");

    project.generate().arg("Dump.csx").assert().success();

    let dumped = project.read("Dump.cs");
    assert!(dumped.starts_with("using System.Data;\n\npublic class Customer\n{\n"));
    assert!(!dumped.contains("namespace"));
    assert!(project.leftover_temp_files().is_empty());
}

#[test]
fn test_config_file_sets_behavior_and_runtime() {
    let project = TestProject::new();
    project.create_file(
        "scriptgen.toml",
        "[generation]\noutput_behavior = \"never-generate-output\"\n\n[runtime]\ncommand = \"sh\"\ntimeout = \"30s\"\n",
    );
    project.create_file("Models.csx", "echo x\n");

    project.generate().arg("Models.csx").assert().success();
    assert!(!project.exists("Models.cs"));

    // The command line wins over the file
    project
        .generate()
        .arg("Models.csx")
        .arg("--outnoc")
        .assert()
        .success();
    assert_eq!(project.read("Models.cs"), "x\n");
}

#[test]
fn test_formatting_uses_workspace_defaults() {
    let project = TestProject::new();
    project.create_file("scriptgen.toml", "[format]\nindent_size = 2\n");
    project.create_file(
        "Fmt.csx",
        "echo '##scriptgen: format on'\necho 'class A {'\necho 'int x;'\necho '}'\n",
    );

    project.generate().arg("Fmt.csx").assert().success();

    assert_eq!(project.read("Fmt.cs"), "class A {\n  int x;\n}\n");
}

#[test]
fn test_directives_command() {
    let project = TestProject::new();
    let script = project.create_file(
        "Models.csx",
        "#r \"System.Data\"\n  #load \"Domain/Customer.cs\"\nusing System;\n#load \"late.csx\"\n",
    );

    project
        .scriptgen()
        .arg("directives")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("1:1\t#r\tSystem.Data"))
        .stdout(predicate::str::contains("2:3\t#load\tDomain/Customer.cs"))
        .stdout(predicate::str::contains("late.csx").not());
}

#[test]
fn test_extract_command() {
    let project = TestProject::new();
    let file = project.create_file(
        "Shapes.cs",
        "using System;\nnamespace Geometry { using System.Linq; public class Circle {} public struct Point {} }\n",
    );

    project
        .scriptgen()
        .arg("extract")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("// Circle (Geometry)"))
        .stdout(predicate::str::contains("// Point (Geometry)"))
        .stdout(predicate::str::contains("using System.Linq;"));

    let broken = project.create_file("Broken.cs", "namespace A { public class B {\n");
    project
        .scriptgen()
        .arg("extract")
        .arg(&broken)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_init_writes_config_once() {
    let project = TestProject::new();

    project
        .scriptgen()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("scriptgen.toml"));
    assert!(project.read("scriptgen.toml").contains("[generation]"));

    project
        .scriptgen()
        .arg("init")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));

    project.scriptgen().args(["init", "--force"]).assert().success();
}
