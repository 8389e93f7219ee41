use std::path::Path;
use std::sync::OnceLock;
use std::time::Instant;
use std::{env, fs};

static INSTANCE_ID: OnceLock<String> = OnceLock::new();
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Pin the process start time; call once early in main.
pub fn init_uptime() {
    START_TIME.get_or_init(Instant::now);
}

/// Process uptime in seconds.
pub fn uptime_seconds() -> u64 {
    let start = START_TIME.get_or_init(Instant::now);
    start.elapsed().as_secs()
}

/// Stable identifier for this agent instance.
///
/// Prefers the machine hostname; hosts without a usable one get a generated
/// id persisted across restarts (or, failing that, a per-process one).
pub fn instance_id() -> &'static str {
    INSTANCE_ID.get_or_init(|| {
        if let Ok(name) = hostname::get()
            && let Some(name) = name.to_str()
            && !name.is_empty()
        {
            return name.to_string();
        }
        load_or_generate_id().unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
    })
}

fn load_or_generate_id() -> Result<String, std::io::Error> {
    let path = format!(
        "{}/.meridian/agent-id",
        env::var("HOME").unwrap_or_default()
    );
    if let Ok(id) = fs::read_to_string(&path) {
        let id = id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    let new_id = uuid::Uuid::new_v4().to_string();
    if let Some(parent) = Path::new(&path).parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, &new_id)?;
    Ok(new_id)
}
