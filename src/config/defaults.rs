use super::*;

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            generation: ApiGeneration::Legacy,
            base_url: None,
            timeout_seconds: 10,
            backup_realtime: false,
            today_formula: None,
            signing: SigningConfig::default(),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            asset_url: String::new(),
            key_pattern: String::new(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            app_id: String::new(),
            app_secret: String::new(),
            safety_margin_seconds: 3600,
            refresh_expired_codes: vec![401],
        }
    }
}

impl Default for OperatingMode {
    fn default() -> Self {
        Self::Automatic
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            hourly_minutes: Some(10),
            daily_minutes: Some(10),
            monthly_minutes: Some(60),
            yearly_minutes: Some(1440),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/alphaess-bridge.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8089,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            api: ApiConfig::default(),
            credentials: CredentialsConfig::default(),
            mode: OperatingMode::default(),
            poll_interval_seconds: 60,
            statistics: StatisticsConfig::default(),
            timezone: "UTC".to_string(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
            stdout_sink: true,
        }
    }
}
