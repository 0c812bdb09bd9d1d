use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const STACK_ENV: [&str; 6] = [
    "TIERSTACK_CONFIG_PATH",
    "TIERSTACK_BASE_CIDR",
    "TIERSTACK_AZ_COUNT",
    "TIERSTACK_COMPUTE_FLEET_SIZE",
    "TIERSTACK_DB_FLEET_SIZE",
    "TIERSTACK_TRUSTED_REPO_REF",
];

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_stack_kdl(&self, content: &str) {
        let path = self.root.path().join("stack.kdl");
        fs::write(path, content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.path().join(".tierstack").join("state.json")
    }

    #[allow(dead_code)]
    pub fn state(&self) -> serde_json::Value {
        let content = fs::read_to_string(self.state_path()).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    /// `tierstack` running inside the project, isolated from the caller's
    /// environment and global config
    #[allow(deprecated)]
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("tierstack").unwrap();
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("XDG_CONFIG_HOME", self.path().join(".config"))
            .env_remove("RUST_LOG");
        for var in STACK_ENV {
            cmd.env_remove(var);
        }
        cmd
    }
}
