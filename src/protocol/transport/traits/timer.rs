//! Asynchronous timer abstraction providing the timing primitives required
//! by the claim and transport logic.

/// Timer trait abstraction; must remain thread-safe when applicable.
pub trait Timer {
    /// Asynchronously wait for `millis` milliseconds.
    fn delay_ms<'a>(
        &'a mut self,
        millis: u32,
    ) -> impl core::future::Future<Output = ()> + 'a;
}
