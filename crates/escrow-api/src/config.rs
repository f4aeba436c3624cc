//! HTTP listener configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Listener settings for the API binary.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

impl ApiConfig {
    /// Variables:
    /// - `HOST` (default: `0.0.0.0`)
    /// - `PORT` (default: 8080)
    pub fn from_env() -> Result<Self, escrow_settlement::ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: parse_var("HOST", defaults.host)?,
            port: parse_var("PORT", defaults.port)?,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_var<T>(var: &str, default: T) -> Result<T, escrow_settlement::ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| {
            escrow_settlement::ConfigError::Invalid(var.to_string(), e.to_string())
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_all_interfaces_on_8080() {
        assert_eq!(ApiConfig::default().addr().to_string(), "0.0.0.0:8080");
    }
}
