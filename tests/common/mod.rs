use std::process::{Child, Command};
use std::sync::Once;
use std::time::{Duration, Instant};

pub fn get_free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("failed to bind to address")
        .local_addr()
        .unwrap()
        .port()
}

/// Guard that kills and waits on a child process when dropped.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        drop(self.0.kill());
        drop(self.0.wait());
    }
}

/// Ensure the workspace binaries are built once per process, so concurrent
/// tests don't race on cargo builds.
fn ensure_built() {
    static BUILD_ONCE: Once = Once::new();
    BUILD_ONCE.call_once(|| {
        let status = Command::new("cargo")
            .args(["build"])
            .status()
            .expect("failed to run cargo build for tests");
        assert!(status.success(), "cargo build failed");
    });
}

fn controller_bin() -> String {
    ensure_built();

    std::env::current_dir()
        .unwrap()
        .join("target/debug/vm-controller")
        .to_string_lossy()
        .into_owned()
}

/// Spawn the controller in demo mode (simulated instance) on the given port.
pub fn spawn_demo(port: u16, transition_ms: u64) -> KillOnDrop {
    let bin = controller_bin();

    KillOnDrop(
        Command::new(bin)
            .args([
                "demo",
                "--bind",
                "127.0.0.1",
                "--port",
                &port.to_string(),
                "--transition-ms",
                &transition_ms.to_string(),
                "--poll-interval-ms",
                "100",
            ])
            .spawn()
            .expect("failed to start controller"),
    )
}

/// Block until a TCP listener is accepting on `127.0.0.1:port` or timeout.
pub async fn wait_for_listening(port: u16, timeout_secs: u64) {
    let start = Instant::now();
    while std::net::TcpStream::connect(("127.0.0.1", port)).is_err() {
        if start.elapsed() > Duration::from_secs(timeout_secs) {
            panic!("server did not start within timeout");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
