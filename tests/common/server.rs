//! Test server management.
//!
//! Spawns and manages linkhubd instances for integration testing. Every
//! server is seeded with users 1 (alice), 2 (bob) and 3 (carol), and room 10
//! whose members are alice and bob.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// A test server instance.
pub struct TestServer {
    child: Child,
    port: u16,
    _data_dir: TempDir,
}

impl TestServer {
    /// Spawn a new test server listening on `port`.
    pub async fn spawn(port: u16) -> anyhow::Result<Self> {
        Self::spawn_with(port, 0, "").await
    }

    /// Spawn with the HTTP side-channel on `http_port` (0 disables it) and
    /// extra TOML appended to the default test configuration.
    pub async fn spawn_with(port: u16, http_port: u16, extra: &str) -> anyhow::Result<Self> {
        let data_dir = tempfile::Builder::new()
            .prefix(&format!("linkhub-test-{port}-"))
            .tempdir()?;

        let config_path = data_dir.path().join("config.toml");
        let config_content = format!(
            r#"
[server]
name = "test-hub"
http_port = {http_port}

[listen]
address = "127.0.0.1:{port}"

[database]
path = "{db}"

[rate_limit]
messages_per_second = 1000
burst = 1000

[[seed.users]]
id = 1
name = "alice"

[[seed.users]]
id = 2
name = "bob"

[[seed.users]]
id = 3
name = "carol"

[[seed.rooms]]
id = 10
name = "general"
members = [1, 2]
{extra}
"#,
            db = data_dir.path().join("test.db").display(),
        );
        std::fs::write(&config_path, config_content)?;

        let binary_path = PathBuf::from(env!("CARGO_BIN_EXE_linkhubd"));
        let child = Command::new(&binary_path).arg(&config_path).spawn()?;

        let server = Self {
            child,
            port,
            _data_dir: data_dir,
        };

        // Wait for server to start listening
        server.wait_until_ready().await?;

        Ok(server)
    }

    /// Wait until the server is accepting connections.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("Server failed to start within 5 seconds")
    }

    /// Get the server address.
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Connect and identify through the handshake query string.
    pub async fn connect_as(&self, user_id: u64) -> anyhow::Result<super::client::TestClient> {
        let mut client = super::client::TestClient::connect(&self.address(), Some(user_id)).await?;
        client.expect_type("connection").await?;
        Ok(client)
    }

    /// Connect without an identity.
    pub async fn connect_anonymous(&self) -> anyhow::Result<super::client::TestClient> {
        super::client::TestClient::connect(&self.address(), None).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Kill the server process; the temp dir cleans up after itself.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
