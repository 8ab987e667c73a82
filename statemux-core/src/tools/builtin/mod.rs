//! Demo tools shipped with the gateway

mod chat;
mod dice;
mod weather;

pub use chat::{StreamChat, StreamChatArgs};
pub use dice::{RollDice, RollDiceArgs};
pub use weather::{find_city_id, FetchWeather, FetchWeatherArgs};

use super::ToolRegistry;

pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry
        .register(RollDice)
        .register(FetchWeather::from_env())
        .register(StreamChat::default());
}
