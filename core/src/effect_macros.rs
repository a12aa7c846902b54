//! Macros that cut the boilerplate of building `Effect` values.

/// Wrap an async block into an `Effect::Future`.
///
/// The block evaluates to `Option<Action>`; `Some` is dispatched back into
/// the store.
///
/// ```rust,ignore
/// use tripdesk_core::async_effect;
///
/// let api = Arc::clone(&env.api);
/// async_effect! {
///     let result = api.payment_link(reservation_id).await;
///     Some(BookingAction::PaymentLinkFetched { reservation_id, result })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Build an `Effect::Delay`.
///
/// ```rust,ignore
/// use tripdesk_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(2),
///     action: BookingAction::RefreshSeatMap { leg: Leg::Outbound }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}
