/// Common test utilities: throwaway git repositories for transfer tests
#[allow(dead_code)]
pub mod fixtures {
    use multirepo::RepositoryDescriptor;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use tempfile::TempDir;

    /// Run git in `dir` and return stdout, panicking on failure
    pub fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args([
                "-c",
                "user.name=multirepo tests",
                "-c",
                "user.email=tests@example.com",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .expect("Failed to execute git");

        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// A directory of origin repositories plus a separate target directory
    pub struct GitFixture {
        pub temp_dir: TempDir,
        pub origins: PathBuf,
        pub target: PathBuf,
    }

    impl GitFixture {
        pub fn new() -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp dir");
            let origins = temp_dir.path().join("origins");
            let target = temp_dir.path().join("target");
            std::fs::create_dir_all(&origins).expect("Failed to create origins dir");
            std::fs::create_dir_all(&target).expect("Failed to create target dir");

            Self {
                temp_dir,
                origins,
                target,
            }
        }

        /// Create an origin repository on branch `main` with one commit
        pub fn create_origin(&self, name: &str) -> PathBuf {
            let path = self.origins.join(name);
            std::fs::create_dir_all(&path).expect("Failed to create origin dir");
            git(&path, &["init", "--quiet"]);
            git(&path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
            self.commit(&path, "initial commit");
            path
        }

        /// Add a commit touching a file named after the message
        pub fn commit(&self, repo: &Path, message: &str) {
            let file = repo.join(format!("{}.txt", message.replace(' ', "-")));
            std::fs::write(&file, message).expect("Failed to write file");
            git(repo, &["add", "--all"]);
            git(repo, &["commit", "--quiet", "-m", message]);
        }

        /// Descriptor pointing at the origin created by [`GitFixture::create_origin`]
        pub fn descriptor(&self, name: &str) -> RepositoryDescriptor {
            RepositoryDescriptor {
                name: name.to_string(),
                owner: Some("acme".to_string()),
                clone_url: Some(self.origins.join(name).to_string_lossy().into_owned()),
                default_branch: Some("main".to_string()),
                archived: false,
                language: None,
            }
        }

        pub fn checkout(&self, name: &str) -> PathBuf {
            self.target.join(name)
        }
    }
}

/// Assertion helpers for test validation
#[allow(dead_code)]
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
