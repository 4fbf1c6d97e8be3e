use crate::{
    config::{BuildConfig, ProjectConfig},
    executors::BenchmarkBinary,
    repository::Repository,
};
use itertools::Itertools;
use std::{
    collections::BTreeMap,
    env,
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::{Command, Output},
};
use thiserror::Error;
use tracing::{debug, error, info};

/// name of the benchmark binary produced by `make bench`
pub const BENCHMARK_BINARY: &str = "pmemkv_bench";

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Failed to create a temporary directory")]
    TempDir(#[source] std::io::Error),
    #[error("Failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    Failed {
        command: String,
        status: i32,
        stdout: String,
        stderr: String,
    },
    #[error("{0} was not produced by the build")]
    MissingArtifact(PathBuf),
}

pub(crate) fn describe(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy())
        .join(" ")
}

/// Run a command to completion, failing with the captured output on a non-zero exit
pub(crate) fn run_checked(command: &mut Command) -> Result<Output, ProjectError> {
    let description = describe(command);
    debug!(command = %description, "Running");

    let output = command.output().map_err(|source| ProjectError::Spawn {
        command: description.clone(),
        source,
    })?;

    if output.status.success() {
        Ok(output)
    } else {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        error!(command = %description, stdout = %stdout, stderr = %stderr, "Command failed");

        Err(ProjectError::Failed {
            command: description,
            status: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

fn parent_path() -> OsString {
    env::var_os("PATH").unwrap_or_default()
}

/// pkg-config directories below an install prefix
fn pkg_config_dirs(prefix: &Path) -> Vec<PathBuf> {
    ["lib/pkgconfig", "lib64/pkgconfig", "share/pkgconfig"]
        .iter()
        .map(|dir| prefix.join(dir))
        .collect()
}

/// library directories below an install prefix
fn library_dirs(prefix: &Path) -> Vec<PathBuf> {
    vec![prefix.join("lib"), prefix.join("lib64")]
}

fn join_paths(paths: &[PathBuf]) -> OsString {
    env::join_paths(paths).unwrap_or_else(|_| {
        // join_paths only fails for entries containing the separator
        paths
            .iter()
            .map(|path| path.to_string_lossy())
            .join(":")
            .into()
    })
}

/// A cmake based project, installed into its own checkout
#[derive(Debug)]
pub struct CmakeProject {
    pub repository: Repository,
    build_env: BTreeMap<String, String>,
    cmake_params: Vec<String>,
    pkg_config_path: Vec<PathBuf>,
    /// `PATH` the build tools are looked up in
    search_path: OsString,
}

impl CmakeProject {
    pub fn load(
        config: &ProjectConfig,
        dependencies: &[&CmakeProject],
        search_path: &OsStr,
    ) -> Result<Self, ProjectError> {
        let repository = Repository::checkout(config)?;
        let mut pkg_config_path = pkg_config_dirs(repository.path());

        for dependency in dependencies {
            pkg_config_path.extend(dependency.pkg_config_path.iter().cloned());
        }

        let mut cmake_params = config.cmake_params.clone();
        cmake_params.push(format!(
            "-DCMAKE_INSTALL_PREFIX={}",
            repository.path().to_string_lossy()
        ));

        Ok(Self {
            repository,
            build_env: config.env.clone(),
            cmake_params,
            pkg_config_path,
            search_path: search_path.to_owned(),
        })
    }

    pub fn prefix(&self) -> &Path {
        self.repository.path()
    }

    pub fn pkg_config_path(&self) -> OsString {
        join_paths(&self.pkg_config_path)
    }

    pub fn library_path(&self) -> Vec<PathBuf> {
        library_dirs(self.prefix())
    }

    fn command(&self, program: &str) -> Command {
        let mut command = Command::new(program);
        command
            .current_dir(self.prefix())
            .env_clear()
            .envs(&self.build_env)
            .env("PATH", &self.search_path)
            .env("PKG_CONFIG_PATH", self.pkg_config_path());
        command
    }

    /// configure, build and install the project
    pub fn build(&self) -> Result<(), ProjectError> {
        let cpus = num_cpus::get().to_string();

        info!(url = %self.repository.url, env = ?self.build_env, "Building project");
        run_checked(self.command("cmake").arg(".").args(&self.cmake_params))?;
        run_checked(self.command("make").args(["-j", cpus.as_str(), "install"]))?;
        info!(url = %self.repository.url, prefix = ?self.prefix(), "Installed project");

        Ok(())
    }
}

/// The benchmark harness, built against an installed engine
#[derive(Debug)]
pub struct DbBench {
    pub repository: Repository,
    env: BTreeMap<String, String>,
    pkg_config_path: OsString,
    library_path: Vec<PathBuf>,
    search_path: OsString,
}

impl DbBench {
    pub fn load(config: &ProjectConfig, engine: &CmakeProject) -> Result<Self, ProjectError> {
        Ok(Self {
            repository: Repository::checkout(config)?,
            env: config.env.clone(),
            pkg_config_path: engine.pkg_config_path(),
            library_path: engine.library_path(),
            search_path: engine.search_path.clone(),
        })
    }

    pub fn build(&self) -> Result<(), ProjectError> {
        info!(url = %self.repository.url, "Building benchmark");
        run_checked(
            Command::new("make")
                .arg("bench")
                .current_dir(self.repository.path())
                .env_clear()
                .env("PATH", &self.search_path)
                .env("PKG_CONFIG_PATH", &self.pkg_config_path),
        )?;

        Ok(())
    }

    /// the built binary, ready for the executor
    pub fn binary(&self) -> Result<BenchmarkBinary, ProjectError> {
        let path = self.repository.path().join(BENCHMARK_BINARY);

        if !path.is_file() {
            return Err(ProjectError::MissingArtifact(path));
        }

        Ok(BenchmarkBinary {
            path,
            library_path: self.library_path.clone(),
            env: self.env.clone(),
        })
    }
}

/// Every project of a build configuration, checked out and installed in dependency order. The
/// checkouts are removed once this is dropped.
#[derive(Debug)]
pub struct BuildTree {
    pub libpmemobjcpp: CmakeProject,
    pub pmemkv: CmakeProject,
    pub db_bench: DbBench,
}

impl BuildTree {
    pub fn build(config: &BuildConfig) -> Result<Self, ProjectError> {
        Self::build_with_path(config, &parent_path())
    }

    /// `build` with the build tools looked up in `search_path` instead of the inherited `PATH`
    pub fn build_with_path(
        config: &BuildConfig,
        search_path: &OsStr,
    ) -> Result<Self, ProjectError> {
        let libpmemobjcpp = CmakeProject::load(&config.libpmemobjcpp, &[], search_path)?;
        libpmemobjcpp.build()?;

        let pmemkv = CmakeProject::load(&config.pmemkv, &[&libpmemobjcpp], search_path)?;
        pmemkv.build()?;

        let db_bench = DbBench::load(&config.db_bench, &pmemkv)?;
        db_bench.build()?;

        Ok(Self {
            libpmemobjcpp,
            pmemkv,
            db_bench,
        })
    }

    /// project name -> SHA the build used
    pub fn commits(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("libpmemobjcpp".to_owned(), self.libpmemobjcpp.repository.sha.clone()),
            ("pmemkv".to_owned(), self.pmemkv.repository.sha.clone()),
            ("db_bench".to_owned(), self.db_bench.repository.sha.clone()),
        ])
    }

    pub fn binary(&self) -> Result<BenchmarkBinary, ProjectError> {
        self.db_bench.binary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt};

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "kvbench")
            .env("GIT_AUTHOR_EMAIL", "kvbench@localhost")
            .env("GIT_COMMITTER_NAME", "kvbench")
            .env("GIT_COMMITTER_EMAIL", "kvbench@localhost")
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn origin(dir: &Path) {
        git(dir, &["init", "-q"]);
        fs::write(dir.join("CMakeLists.txt"), "project(stub)\n").unwrap();
        git(dir, &["add", "CMakeLists.txt"]);
        git(dir, &["commit", "-q", "-m", "initial"]);
    }

    /// Build tool stand-in appending its name, arguments and environment to `log`. `make bench`
    /// leaves an executable benchmark behind.
    fn stub_tool(dir: &Path, name: &str, log: &Path) {
        let path = dir.join(name);
        fs::write(
            &path,
            format!(
                r#"#!/bin/sh
echo "${{0##*/}} $* | PKG_CONFIG_PATH=$PKG_CONFIG_PATH | CC=${{CC:-unset}} | HOME=${{HOME:-unset}}" >> "{log}"
if [ "$1" = "bench" ]; then
    echo '#!/bin/sh' > {binary}
    chmod +x {binary}
fi
"#,
                log = log.display(),
                binary = BENCHMARK_BINARY,
            ),
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn project(url: &Path, env: &[(&str, &str)]) -> ProjectConfig {
        ProjectConfig {
            repo_url: url.to_string_lossy().into_owned(),
            commit: "HEAD".to_owned(),
            env: env
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            cmake_params: vec!["-DBUILD_TESTS=OFF".to_owned()],
        }
    }

    #[test]
    fn builds_projects_in_dependency_order() {
        if !git_available() {
            return;
        }

        let origin_dir = tempfile::tempdir().unwrap();
        origin(origin_dir.path());
        let tools = tempfile::tempdir().unwrap();
        let log = tools.path().join("build.log");
        stub_tool(tools.path(), "cmake", &log);
        stub_tool(tools.path(), "make", &log);

        let config = BuildConfig {
            libpmemobjcpp: project(origin_dir.path(), &[("CC", "gcc")]),
            pmemkv: project(origin_dir.path(), &[("CC", "clang")]),
            db_bench: project(origin_dir.path(), &[]),
        };
        let search_path = env::join_paths(
            std::iter::once(tools.path().to_path_buf()).chain(env::split_paths(&parent_path())),
        )
        .unwrap();

        let tree = BuildTree::build_with_path(&config, &search_path).unwrap();

        let cpus = num_cpus::get();
        let first = tree.libpmemobjcpp.prefix();
        let second = tree.pmemkv.prefix();
        let first_pc = join_paths(&pkg_config_dirs(first));
        let second_pc = join_paths(
            &pkg_config_dirs(second)
                .into_iter()
                .chain(pkg_config_dirs(first))
                .collect_vec(),
        );
        let first_pc = first_pc.to_string_lossy();
        let second_pc = second_pc.to_string_lossy();

        let expected = vec![
            format!(
                "cmake . -DBUILD_TESTS=OFF -DCMAKE_INSTALL_PREFIX={} | PKG_CONFIG_PATH={first_pc} | CC=gcc | HOME=unset",
                first.display()
            ),
            format!("make -j {cpus} install | PKG_CONFIG_PATH={first_pc} | CC=gcc | HOME=unset"),
            format!(
                "cmake . -DBUILD_TESTS=OFF -DCMAKE_INSTALL_PREFIX={} | PKG_CONFIG_PATH={second_pc} | CC=clang | HOME=unset",
                second.display()
            ),
            format!("make -j {cpus} install | PKG_CONFIG_PATH={second_pc} | CC=clang | HOME=unset"),
            format!("make bench | PKG_CONFIG_PATH={second_pc} | CC=unset | HOME=unset"),
        ];
        let log = fs::read_to_string(&log).unwrap();
        assert_eq!(log.lines().collect_vec(), expected);

        let binary = tree.binary().unwrap();
        assert_eq!(binary.path, tree.db_bench.repository.path().join(BENCHMARK_BINARY));
        assert_eq!(binary.library_path, library_dirs(second));

        let commits = tree.commits();
        assert_eq!(commits.len(), 3);
        assert!(commits.values().all(|sha| sha.len() == 40));
    }

    #[test]
    fn failing_build_tool_stops_the_build() {
        if !git_available() {
            return;
        }

        let origin_dir = tempfile::tempdir().unwrap();
        origin(origin_dir.path());
        let tools = tempfile::tempdir().unwrap();
        let cmake = tools.path().join("cmake");
        fs::write(&cmake, "#!/bin/sh\necho 'no compiler' >&2\nexit 1\n").unwrap();
        fs::set_permissions(&cmake, fs::Permissions::from_mode(0o755)).unwrap();

        let config = project(origin_dir.path(), &[]);
        let libpmemobjcpp = CmakeProject::load(&config, &[], tools.path().as_os_str()).unwrap();

        match libpmemobjcpp.build() {
            Err(ProjectError::Failed { command, stderr, .. }) => {
                assert!(command.starts_with("cmake ."));
                assert_eq!(stderr.trim(), "no compiler");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn failed_command_keeps_output() {
        let result = run_checked(Command::new("sh").args(["-c", "echo out; echo err >&2; exit 4"]));

        match result {
            Err(ProjectError::Failed {
                command,
                status,
                stdout,
                stderr,
            }) => {
                assert_eq!(command, "sh -c echo out; echo err >&2; exit 4");
                assert_eq!(status, 4);
                assert_eq!(stdout.trim(), "out");
                assert_eq!(stderr.trim(), "err");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        assert!(matches!(
            run_checked(&mut Command::new("kvbench-definitely-not-installed")),
            Err(ProjectError::Spawn { .. })
        ));
    }

    #[test]
    fn pkg_config_dirs_below_prefix() {
        let dirs = pkg_config_dirs(Path::new("/opt/pmemkv"));

        assert_eq!(dirs[0], PathBuf::from("/opt/pmemkv/lib/pkgconfig"));
        assert_eq!(
            join_paths(&dirs),
            OsString::from(
                "/opt/pmemkv/lib/pkgconfig:/opt/pmemkv/lib64/pkgconfig:/opt/pmemkv/share/pkgconfig"
            )
        );
    }
}
