// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::CallError;
use crate::peer::types::ServerConfig;
use once_cell::sync::Lazy;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено (если не задан RUST_LOG)

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    // ВАЖНО: Эта настройка работает только в debug режиме!
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// Период ожидания перед попыткой восстановления
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Максимум попыток переподключения на одного участника
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// После скольких попыток переходим на TURN-only
pub const RELAY_AFTER_ATTEMPTS: u32 = 2;

/// Интервал сторожевой проверки соединения
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Сколько можно висеть в Negotiating
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Дефолтные STUN серверы
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    (0..5)
        .map(|i| {
            let host = if i == 0 {
                "stun.l.google.com:19302".to_string()
            } else {
                format!("stun{}.l.google.com:19302", i)
            };
            ServerConfig {
                id: format!("default-stun-{}", i),
                r#type: "stun".into(),
                url: format!("stun:{}", host),
                username: None,
                credential: None,
            }
        })
        .collect()
});

/// Настройки звонка: таймеры политики восстановления и ICE серверы
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub grace_period: Duration,
    pub max_reconnect_attempts: u32,
    pub relay_after_attempts: u32,
    pub watchdog_interval: Duration,
    pub negotiation_timeout: Duration,
    pub ice_servers: Vec<ServerConfig>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            grace_period: GRACE_PERIOD,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            relay_after_attempts: RELAY_AFTER_ATTEMPTS,
            watchdog_interval: WATCHDOG_INTERVAL,
            negotiation_timeout: NEGOTIATION_TIMEOUT,
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
        }
    }
}

impl CallConfig {
    /// Добавляет пользовательские ICE серверы после валидации
    pub fn with_ice_servers(mut self, servers: Vec<ServerConfig>) -> Result<Self, CallError> {
        log::info!("Setting {} custom ICE servers", servers.len());

        // Валидация серверов
        for server in &servers {
            if server.url.is_empty() {
                return Err(CallError::Config("Server URL cannot be empty".into()));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(CallError::Config(
                    "TURN servers require username and credential".into(),
                ));
            }
        }

        self.ice_servers.extend(servers);
        Ok(self)
    }

    pub fn has_relay_server(&self) -> bool {
        self.ice_servers.iter().any(|s| s.r#type == "turn")
    }
}
