use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:", "turns:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        // В зависимости от типа сервера добавляем нужную схему
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Разбирает TURN сервер из строки вида `user:pass@host:port`
pub fn parse_turn_server(value: &str) -> Option<ServerConfig> {
    let (creds, host) = value.rsplit_once('@')?;
    let (username, credential) = creds.split_once(':')?;
    if host.is_empty() || username.is_empty() {
        return None;
    }
    Some(ServerConfig {
        id: format!("turn-{}", host),
        r#type: "turn".into(),
        url: host.to_string(),
        username: Some(username.to_string()),
        credential: Some(credential.to_string()),
    })
}
