use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cmdwatch::errors::{CmdwatchError, Result};
use cmdwatch::exec::{BoxFuture, ContainerRuntime, ContainerSpec, ContainerState};

/// In-memory container runtime.
///
/// Lifecycle calls are recorded as strings like `"inspect dev"`,
/// `"create dev python:3.12"`, `"start dev"`.
pub struct FakeContainerRuntime {
    program: String,
    containers: Mutex<HashMap<String, ContainerState>>,
    images: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeContainerRuntime {
    /// `program` is what routed command lines invoke; point it at
    /// [`write_fake_docker`] to actually run them.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            containers: Mutex::new(HashMap::new()),
            images: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_container(self, name: &str, state: ContainerState) -> Self {
        self.containers.lock().unwrap().insert(name.to_string(), state);
        self
    }

    pub fn with_images(mut self, images: &[&str]) -> Self {
        self.images = images.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn state_of(&self, name: &str) -> ContainerState {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(ContainerState::Absent)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ContainerRuntime for FakeContainerRuntime {
    fn program(&self) -> &str {
        &self.program
    }

    fn inspect<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<ContainerState>> {
        Box::pin(async move {
            self.record(format!("inspect {name}"));
            Ok(self.state_of(name))
        })
    }

    fn create_detached<'a>(&'a self, spec: &'a ContainerSpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(format!("create {} {}", spec.name, spec.image));
            self.containers
                .lock()
                .unwrap()
                .insert(spec.name.clone(), ContainerState::Running);
            Ok(())
        })
    }

    fn start<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(format!("start {name}"));
            let mut containers = self.containers.lock().unwrap();
            match containers.get_mut(name) {
                Some(state) => {
                    *state = ContainerState::Running;
                    Ok(())
                }
                None => Err(CmdwatchError::Container(format!("no such container: {name}"))),
            }
        })
    }

    fn list_images(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { Ok(self.images.clone()) })
    }

    fn list_containers(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.containers.lock().unwrap().keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }
}

/// Write an executable stand-in for the docker CLI into `dir`.
///
/// Every invocation is appended to `docker_calls.log` next to the script.
/// `exec ... sh -c CMD` and `run ... sh -c CMD` run `sh -c CMD` on the host.
pub fn write_fake_docker(dir: &Path) -> PathBuf {
    let script = dir.join("fake-docker");
    let body = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/docker_calls.log"
case "$1" in
  exec|run)
    while [ "$#" -gt 0 ] && [ "$1" != "sh" ]; do shift; done
    exec "$@"
    ;;
esac
exit 0
"#;
    fs::write(&script, body).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}
