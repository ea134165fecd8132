use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const AUTHENTICATE_URL: &str = "https://api.sense.com/apiservice/api/v1/authenticate";

/// Bearer-token credentials for one Sense monitor. The pipeline only ever
/// reads these; acquisition and storage live at this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    #[serde(rename = "monitorId")]
    pub monitor_id: i64,
    #[serde(rename = "timeZone")]
    pub time_zone: String,
    /// Issuance time, UTC.
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct AuthResponse {
    access_token: String,
    monitors: Vec<MonitorInfo>,
}

#[derive(Deserialize)]
struct MonitorInfo {
    id: i64,
    time_zone: String,
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read credentials from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse credentials in {}", path.display()))
    }

    /// Write the credentials as pretty JSON, readable by the owner only.
    pub fn store(&self, path: &Path) -> Result<()> {
        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');
        fs::write(path, data)
            .with_context(|| format!("write credentials to {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("set permissions on {}", path.display()))?;
        }
        Ok(())
    }

    /// Exchange an account email and password for a bearer token and the
    /// first monitor's identity.
    pub async fn fetch(http: &reqwest::Client, email: &str, password: &str) -> Result<Self> {
        let response = http
            .post(AUTHENTICATE_URL)
            .form(&[("email", email), ("password", password)])
            .send()
            .await
            .context("authenticate request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("authenticate returned status {status}"));
        }

        let auth: AuthResponse = response
            .json()
            .await
            .context("failed to decode authenticate response")?;
        let monitor = auth
            .monitors
            .first()
            .ok_or_else(|| anyhow!("authenticate response listed no monitors"))?;

        Ok(Self {
            token: auth.access_token,
            monitor_id: monitor.id,
            time_zone: monitor.time_zone.clone(),
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            token: "t1.12345.abcdef".to_string(),
            monitor_id: 44610,
            time_zone: "America/Los_Angeles".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn store_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let original = creds();
        original.store(&path).unwrap();

        let loaded = Credentials::load(&path).unwrap();
        assert_eq!(loaded.token, original.token);
        assert_eq!(loaded.monitor_id, original.monitor_id);
        assert_eq!(loaded.time_zone, original.time_zone);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn stored_file_uses_the_wire_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        creds().store(&path).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"monitorId\""));
        assert!(raw.contains("\"timeZone\""));
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn load_rejects_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Credentials::load(&dir.path().join("absent.json")).is_err());

        let path = dir.path().join("bad.json");
        fs::write(&path, "{\"token\":").unwrap();
        assert!(Credentials::load(&path).is_err());
    }
}
