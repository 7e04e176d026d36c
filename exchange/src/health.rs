use crate::adapter::{Event, Exchange};

/// Connection health state for exchange trade streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionHealth {
    #[default]
    Disconnected,
    Connected,
    Reconnecting,
    /// The live venue is unavailable and the synthetic source took over.
    Fallback,
}

impl ConnectionHealth {
    /// Next state after observing `event`.
    pub fn on_event(self, event: &Event) -> Self {
        match event {
            Event::Connected(Exchange::Synthetic) => ConnectionHealth::Fallback,
            Event::Connected(_) => ConnectionHealth::Connected,
            Event::Disconnected(..) => match self {
                ConnectionHealth::Connected | ConnectionHealth::Reconnecting => {
                    ConnectionHealth::Reconnecting
                }
                other => other,
            },
            Event::TradesReceived(..) | Event::Malformed(..) => self,
        }
    }
}

impl std::fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionHealth::Disconnected => "disconnected",
            ConnectionHealth::Connected => "connected",
            ConnectionHealth::Reconnecting => "reconnecting",
            ConnectionHealth::Fallback => "synthetic fallback",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_stream_events() {
        let health = ConnectionHealth::default();
        let health = health.on_event(&Event::Connected(Exchange::BinanceLinear));
        assert_eq!(health, ConnectionHealth::Connected);

        let health = health.on_event(&Event::Disconnected(
            Exchange::BinanceLinear,
            "Read timeout".to_string(),
        ));
        assert_eq!(health, ConnectionHealth::Reconnecting);

        let health = health.on_event(&Event::Connected(Exchange::Synthetic));
        assert_eq!(health, ConnectionHealth::Fallback);
    }

    #[test]
    fn never_connected_stays_disconnected() {
        let health = ConnectionHealth::Disconnected.on_event(&Event::Disconnected(
            Exchange::BinanceSpot,
            "Failed to connect".to_string(),
        ));
        assert_eq!(health, ConnectionHealth::Disconnected);
    }
}
