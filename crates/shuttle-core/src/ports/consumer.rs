//! Consumer port - the capability callers implement to receive deliveries.

use async_trait::async_trait;

use crate::queue::Delivery;

/// Consumer receives deliveries from a consuming queue.
///
/// The dispatcher awaits `consume` once per delivery, one at a time per
/// queue. Nothing is observed from the call: the consumer resolves the
/// delivery itself with `Delivery::ack` or `Delivery::reject`. A delivery
/// left unresolved stays in the unacked list.
///
/// # Example
/// ```ignore
/// struct PrintConsumer;
///
/// #[async_trait]
/// impl Consumer for PrintConsumer {
///     async fn consume(&self, delivery: Delivery) {
///         println!("{}", delivery.payload());
///         let _ = delivery.ack().await;
///     }
/// }
/// ```
#[async_trait]
pub trait Consumer: Send + Sync {
    async fn consume(&self, delivery: Delivery);
}
