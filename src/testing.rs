//! Scripted `prlctl` stand-in for unit tests.

use parking_lot::Mutex;

use crate::error::Result;
use crate::executor::CommandExecutor;

type Handler = Box<dyn FnMut(&[&str]) -> Result<String> + Send>;

/// Executor whose replies come from a closure; records every invocation.
pub struct ScriptedExecutor {
    handler: Mutex<Handler>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&[&str]) -> Result<String> + Send + 'static,
    {
        Self {
            handler: Mutex::new(Box::new(handler)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// All invocations so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Invocations whose first argument is `verb`.
    pub fn calls_to(&self, verb: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some(verb))
            .cloned()
            .collect()
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(&self, args: &[&str]) -> Result<String> {
        self.calls
            .lock()
            .push(args.iter().map(|a| a.to_string()).collect());
        (self.handler.lock())(args)
    }
}

/// One `list -i --json` entry: (id, name, state, cpus, ram MiB, video MiB).
pub fn detail(id: &str, name: &str, state: &str, cpus: u32, ram: u64, video: u64) -> String {
    format!(
        r#"{{"ID": "{}", "Name": "{}", "State": "{}", "Hardware": {{"cpu": {{"cpus": {}}}, "memory": {{"size": "{}Mb"}}, "video": {{"size": "{}Mb"}}}}}}"#,
        id, name, state, cpus, ram, video
    )
}

/// Wrap entries into a JSON array.
pub fn listing(entries: &[String]) -> String {
    format!("[{}]", entries.join(","))
}

/// One-element `list -f --json` reply.
pub fn summary(id: &str, ip: &str) -> String {
    format!(
        r#"[{{"uuid": "{}", "status": "running", "ip_configured": "{}", "name": "{}"}}]"#,
        id, ip, id
    )
}

/// One VM known to [`FakeHypervisor`].
#[derive(Debug, Clone)]
pub struct FakeVm {
    pub id: String,
    pub name: String,
    pub state: String,
    pub cpus: u32,
    pub ram_mib: u64,
    pub video_mib: u64,
    pub ip: String,
    /// Address polls answered with `-` after the VM is running.
    pub polls_until_ip: u32,
}

/// In-memory Parallels host that understands the `prlctl` verbs the
/// controller issues.
#[derive(Default)]
pub struct FakeHypervisor {
    vms: Mutex<Vec<FakeVm>>,
    failing: Mutex<Vec<String>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a VM with 256 MiB video RAM that gets an address on the first poll.
    pub fn with_vm(self, id: &str, state: &str, cpus: u32, ram_mib: u64) -> Self {
        let n = self.vms.lock().len() + 2;
        self.vms.lock().push(FakeVm {
            id: id.to_string(),
            name: format!("{}-name", id),
            state: state.to_string(),
            cpus,
            ram_mib,
            video_mib: 256,
            ip: format!("10.211.55.{}", n),
            polls_until_ip: 0,
        });
        self
    }

    /// Change a VM in place.
    pub fn edit(&self, id: &str, f: impl FnOnce(&mut FakeVm)) {
        if let Some(vm) = self.vms.lock().iter_mut().find(|vm| vm.id == id) {
            f(vm);
        }
    }

    /// Make every invocation of `verb` exit with code 255.
    pub fn fail(&self, verb: &str) {
        self.failing.lock().push(verb.to_string());
    }

    pub fn state(&self, id: &str) -> String {
        self.vms
            .lock()
            .iter()
            .find(|vm| vm.id == id)
            .map(|vm| vm.state.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, verb: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some(verb))
            .cloned()
            .collect()
    }

    fn details(&self, include_stopped: bool) -> String {
        let entries: Vec<String> = self
            .vms
            .lock()
            .iter()
            .filter(|vm| include_stopped || vm.state != "stopped")
            .map(|vm| detail(&vm.id, &vm.name, &vm.state, vm.cpus, vm.ram_mib, vm.video_mib))
            .collect();
        listing(&entries)
    }

    fn set_state(&self, key: &str, state: &str) -> Result<String> {
        let mut vms = self.vms.lock();
        let vm = vms
            .iter_mut()
            .find(|vm| vm.id == key || vm.name == key)
            .ok_or_else(not_found)?;
        vm.state = state.to_string();
        Ok(String::new())
    }
}

fn not_found() -> crate::Error {
    crate::Error::CommandFailed {
        exit_code: 255,
        output: "Failed to get VM config: The virtual machine could not be found.".into(),
    }
}

impl CommandExecutor for FakeHypervisor {
    fn execute(&self, args: &[&str]) -> Result<String> {
        self.calls
            .lock()
            .push(args.iter().map(|a| a.to_string()).collect());

        if let Some(verb) = args.first() {
            if self.failing.lock().iter().any(|f| f.as_str() == *verb) {
                return Err(crate::Error::CommandFailed {
                    exit_code: 255,
                    output: format!("Failed to {} the VM", verb),
                });
            }
        }

        match args {
            ["list", "-i", "-a", "--json"] => Ok(self.details(true)),
            ["list", "-i", "--json"] => Ok(self.details(false)),
            ["list", "-f", "--json", key] => {
                let mut vms = self.vms.lock();
                let vm = vms
                    .iter_mut()
                    .find(|vm| vm.id == *key || vm.name == *key)
                    .ok_or_else(not_found)?;
                let ip = if vm.state != "running" {
                    "-".to_string()
                } else if vm.polls_until_ip > 0 {
                    vm.polls_until_ip -= 1;
                    "-".to_string()
                } else {
                    vm.ip.clone()
                };
                Ok(summary(&vm.id, &ip))
            }
            ["start", key] => self.set_state(key, "running"),
            ["stop", key] => self.set_state(key, "stopped"),
            ["suspend", key] => self.set_state(key, "suspended"),
            ["snapshot-switch", key, "--id", _] => self.set_state(key, "running"),
            _ => Err(crate::Error::CommandFailed {
                exit_code: 1,
                output: format!("unknown command: {:?}", args),
            }),
        }
    }
}
