// Order lifecycle, exchange access and the task queue that drives them
pub mod exchange;
pub mod order;
pub mod paper;
pub mod queue;
pub mod service;

pub use exchange::{
    Credentials, Exchange, ExchangeConnector, ExchangeFactory, ExchangeFill, ExchangeOrder,
    ExchangeOrderRequest,
};
pub use order::{Fill, FillApplied, Order, OrderRequest, OrderSide, OrderStatus, OrderType};
pub use paper::{PaperExchange, PaperExchangeFactory, PaperMarket};
pub use queue::{
    ProgressReporter, QueueStats, RetryPolicy, Task, TaskHandler, TaskQueue, TaskState, TaskStatus,
};
pub use service::{OrderService, CANCEL_ORDER, EXECUTE_ORDER};
