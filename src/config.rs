//! Process configuration, resolved once in `main` from the environment.
//!
//! Follows the teacher's `Config::from_env` shape: env var, with a sane
//! default, parsed eagerly and never re-read afterwards.

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub scheduler_enabled: bool,
    pub log_level: String,
    pub log_path: Option<String>,

    pub vendor_api_key: Option<String>,
    pub vendor_api_secret: Option<String>,
    pub vendor_base_url: String,

    pub llm_api_key: Option<String>,
    pub llm_model: String,

    pub morning_report_time: (u32, u32),
    pub morning_triggers_time: (u32, u32),
    pub afternoon_triggers_time: (u32, u32),
    pub afternoon_report_time: (u32, u32),
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_hhmm(value: &str, default: (u32, u32)) -> (u32, u32) {
    let mut parts = value.splitn(2, ':');
    match (parts.next().and_then(|h| h.parse().ok()), parts.next().and_then(|m| m.parse().ok())) {
        (Some(h), Some(m)) => (h, m),
        _ => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let database_path = env_or("DATABASE_PATH", "./surge.db");

        let port = env_or("PORT", "8080").parse().unwrap_or(8080);

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let scheduler_enabled = std::env::var("SCHEDULER_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        let log_level = env_or("LOG_LEVEL", "info");
        let log_path = std::env::var("LOG_PATH").ok();

        let vendor_api_key = std::env::var("VENDOR_API_KEY").ok();
        let vendor_api_secret = std::env::var("VENDOR_API_SECRET").ok();
        let vendor_base_url = env_or("VENDOR_BASE_URL", "https://openapi.koreainvestment.com:9443");

        let llm_api_key = std::env::var("LLM_API_KEY").ok();
        let llm_model = env_or("LLM_MODEL", "gemini-1.5-pro");

        let morning_report_time = parse_hhmm(&env_or("MORNING_REPORT_TIME", "08:00"), (8, 0));
        let morning_triggers_time = parse_hhmm(&env_or("MORNING_TRIGGERS_TIME", "09:10"), (9, 10));
        let afternoon_triggers_time =
            parse_hhmm(&env_or("AFTERNOON_TRIGGERS_TIME", "15:30"), (15, 30));
        let afternoon_report_time =
            parse_hhmm(&env_or("AFTERNOON_REPORT_TIME", "15:40"), (15, 40));

        Self {
            database_path,
            port,
            cors_origins,
            scheduler_enabled,
            log_level,
            log_path,
            vendor_api_key,
            vendor_api_secret,
            vendor_base_url,
            llm_api_key,
            llm_model,
            morning_report_time,
            morning_triggers_time,
            afternoon_triggers_time,
            afternoon_report_time,
        }
    }
}
