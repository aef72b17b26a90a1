pub mod bus;
pub mod open_meteo;

pub use bus::{ConnectError, DeliveryReceipt, EventBus, KafkaEventBus, PublishError};
pub use open_meteo::{FetchError, OpenMeteoApi, WeatherApi};
