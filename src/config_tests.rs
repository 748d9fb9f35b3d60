//! Unit tests for the config module

#[cfg(test)]
mod tests {
    use crate::config::{self, Backend, Config};
    use crate::constants::{BUFFER_SIZE, SAMPLE_RATE};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = assert_ok!(config::parse(""));

        assert_eq!(config, Config::default());
        assert_eq!(config.player.buffer_size, BUFFER_SIZE);
        assert_eq!(config.output.sample_rate, SAMPLE_RATE);
        assert_eq!(config.output.backend, Backend::Net);
    }

    #[test]
    fn test_partial_config() {
        let config = config::parse(
            r#"
            [player]
            buffer_size = 4096

            [output]
            backend = "cpal"
            "#,
        )
        .unwrap();

        assert_eq!(config.player.buffer_size, 4096);
        assert_eq!(config.output.backend, Backend::Cpal);
        // Unset keys keep their defaults
        assert_eq!(config.output.sample_rate, SAMPLE_RATE);
        assert_eq!(config.net.listen, "127.0.0.1:7878");
    }

    #[test]
    fn test_player_settings() {
        let config = config::parse(
            r#"
            [player]
            buffer_size = 1024
            poll_interval_ms = 5
            "#,
        )
        .unwrap();

        let settings = config.player_settings();
        assert_eq!(settings.buffer_size, 1024);
        assert_eq!(settings.poll_interval, Duration::from_millis(5));
    }

    #[test]
    fn test_rejects_zero_buffer_size() {
        assert_err!(config::parse("[player]\nbuffer_size = 0"));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        assert_err!(config::parse("[player]\npoll_interval_ms = 0"));
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert_err!(config::parse("[output]\nbackend = \"alsa\""));
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = config::load(dir.path().join("Config.toml")).await.unwrap();

        assert_eq!(config, Config::default());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        std::fs::write(&path, "[events]\ntick_ms = 8\n").unwrap();

        let config = config::load(&path).await.unwrap();
        assert_eq!(config.events.tick_ms, 8);
        assert_eq!(config.events.capacity, 100);
    }

    #[tokio::test]
    async fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        std::fs::write(&path, "[player\n").unwrap();

        let err = config::load(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("Config.toml"));
    }
}
