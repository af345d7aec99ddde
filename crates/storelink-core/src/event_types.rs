//! Domain event type catalog.
//!
//! Event types split into two delivery families: asynchronous events are
//! dispatched fire-and-forget through background workers with retry, while
//! synchronous events gate a live request and are awaited in-line until one
//! subscribed webhook produces an acceptable answer.
//!
//! The catalog is a closed enum. Unknown event type strings are a decode
//! error at the storage boundary, never a silent no-op.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Webhook-subscribable domain event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Async events.
    /// An order was placed.
    OrderCreated,
    /// An order was confirmed.
    OrderConfirmed,
    /// An order became fully paid.
    OrderFullyPaid,
    /// An order was updated.
    OrderUpdated,
    /// An order was cancelled.
    OrderCancelled,
    /// An order was fulfilled.
    OrderFulfilled,
    /// A draft order was created.
    DraftOrderCreated,
    /// A draft order was updated.
    DraftOrderUpdated,
    /// A draft order was deleted.
    DraftOrderDeleted,
    /// A checkout was created.
    CheckoutCreated,
    /// A checkout was updated.
    CheckoutUpdated,
    /// A customer account was created.
    CustomerCreated,
    /// A customer account was updated.
    CustomerUpdated,
    /// A product was created.
    ProductCreated,
    /// A product was updated.
    ProductUpdated,
    /// A product was deleted.
    ProductDeleted,
    /// A product variant was created.
    ProductVariantCreated,
    /// A product variant was updated.
    ProductVariantUpdated,
    /// A product variant was deleted.
    ProductVariantDeleted,
    /// An invoice was requested for an order.
    InvoiceRequested,
    /// An invoice was sent.
    InvoiceSent,
    /// An invoice was deleted.
    InvoiceDeleted,
    /// A fulfillment was created.
    FulfillmentCreated,
    /// A fulfillment was cancelled.
    FulfillmentCanceled,
    /// Internal diagnostic events for operator-configured monitoring
    /// webhooks.
    Observability,

    // Sync events.
    /// List available payment gateways.
    PaymentListGateways,
    /// Authorize a payment.
    PaymentAuthorize,
    /// Capture a payment.
    PaymentCapture,
    /// Refund a payment.
    PaymentRefund,
    /// Void a payment.
    PaymentVoid,
    /// Confirm a payment.
    PaymentConfirm,
    /// Process a payment.
    PaymentProcess,
    /// Calculate taxes for a checkout.
    CheckoutCalculateTaxes,
    /// Calculate taxes for an order.
    OrderCalculateTaxes,
    /// List shipping methods applicable to a checkout.
    ShippingListMethodsForCheckout,
    /// Filter shipping methods for a checkout.
    CheckoutFilterShippingMethods,
    /// Filter shipping methods for an order.
    OrderFilterShippingMethods,
}

impl EventType {
    /// All synchronous event types, in precedence-relevant order.
    pub const SYNC: &'static [EventType] = &[
        Self::PaymentListGateways,
        Self::PaymentAuthorize,
        Self::PaymentCapture,
        Self::PaymentRefund,
        Self::PaymentVoid,
        Self::PaymentConfirm,
        Self::PaymentProcess,
        Self::CheckoutCalculateTaxes,
        Self::OrderCalculateTaxes,
        Self::ShippingListMethodsForCheckout,
        Self::CheckoutFilterShippingMethods,
        Self::OrderFilterShippingMethods,
    ];

    /// Returns true when this event gates a live request-serving path and is
    /// delivered by the sync coordinator rather than background workers.
    pub fn is_sync(self) -> bool {
        Self::SYNC.contains(&self)
    }

    /// Wire-format name of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OrderCreated => "order_created",
            Self::OrderConfirmed => "order_confirmed",
            Self::OrderFullyPaid => "order_fully_paid",
            Self::OrderUpdated => "order_updated",
            Self::OrderCancelled => "order_cancelled",
            Self::OrderFulfilled => "order_fulfilled",
            Self::DraftOrderCreated => "draft_order_created",
            Self::DraftOrderUpdated => "draft_order_updated",
            Self::DraftOrderDeleted => "draft_order_deleted",
            Self::CheckoutCreated => "checkout_created",
            Self::CheckoutUpdated => "checkout_updated",
            Self::CustomerCreated => "customer_created",
            Self::CustomerUpdated => "customer_updated",
            Self::ProductCreated => "product_created",
            Self::ProductUpdated => "product_updated",
            Self::ProductDeleted => "product_deleted",
            Self::ProductVariantCreated => "product_variant_created",
            Self::ProductVariantUpdated => "product_variant_updated",
            Self::ProductVariantDeleted => "product_variant_deleted",
            Self::InvoiceRequested => "invoice_requested",
            Self::InvoiceSent => "invoice_sent",
            Self::InvoiceDeleted => "invoice_deleted",
            Self::FulfillmentCreated => "fulfillment_created",
            Self::FulfillmentCanceled => "fulfillment_canceled",
            Self::Observability => "observability",
            Self::PaymentListGateways => "payment_list_gateways",
            Self::PaymentAuthorize => "payment_authorize",
            Self::PaymentCapture => "payment_capture",
            Self::PaymentRefund => "payment_refund",
            Self::PaymentVoid => "payment_void",
            Self::PaymentConfirm => "payment_confirm",
            Self::PaymentProcess => "payment_process",
            Self::CheckoutCalculateTaxes => "checkout_calculate_taxes",
            Self::OrderCalculateTaxes => "order_calculate_taxes",
            Self::ShippingListMethodsForCheckout => "shipping_list_methods_for_checkout",
            Self::CheckoutFilterShippingMethods => "checkout_filter_shipping_methods",
            Self::OrderFilterShippingMethods => "order_filter_shipping_methods",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_created" => Ok(Self::OrderCreated),
            "order_confirmed" => Ok(Self::OrderConfirmed),
            "order_fully_paid" => Ok(Self::OrderFullyPaid),
            "order_updated" => Ok(Self::OrderUpdated),
            "order_cancelled" => Ok(Self::OrderCancelled),
            "order_fulfilled" => Ok(Self::OrderFulfilled),
            "draft_order_created" => Ok(Self::DraftOrderCreated),
            "draft_order_updated" => Ok(Self::DraftOrderUpdated),
            "draft_order_deleted" => Ok(Self::DraftOrderDeleted),
            "checkout_created" => Ok(Self::CheckoutCreated),
            "checkout_updated" => Ok(Self::CheckoutUpdated),
            "customer_created" => Ok(Self::CustomerCreated),
            "customer_updated" => Ok(Self::CustomerUpdated),
            "product_created" => Ok(Self::ProductCreated),
            "product_updated" => Ok(Self::ProductUpdated),
            "product_deleted" => Ok(Self::ProductDeleted),
            "product_variant_created" => Ok(Self::ProductVariantCreated),
            "product_variant_updated" => Ok(Self::ProductVariantUpdated),
            "product_variant_deleted" => Ok(Self::ProductVariantDeleted),
            "invoice_requested" => Ok(Self::InvoiceRequested),
            "invoice_sent" => Ok(Self::InvoiceSent),
            "invoice_deleted" => Ok(Self::InvoiceDeleted),
            "fulfillment_created" => Ok(Self::FulfillmentCreated),
            "fulfillment_canceled" => Ok(Self::FulfillmentCanceled),
            "observability" => Ok(Self::Observability),
            "payment_list_gateways" => Ok(Self::PaymentListGateways),
            "payment_authorize" => Ok(Self::PaymentAuthorize),
            "payment_capture" => Ok(Self::PaymentCapture),
            "payment_refund" => Ok(Self::PaymentRefund),
            "payment_void" => Ok(Self::PaymentVoid),
            "payment_confirm" => Ok(Self::PaymentConfirm),
            "payment_process" => Ok(Self::PaymentProcess),
            "checkout_calculate_taxes" => Ok(Self::CheckoutCalculateTaxes),
            "order_calculate_taxes" => Ok(Self::OrderCalculateTaxes),
            "shipping_list_methods_for_checkout" => Ok(Self::ShippingListMethodsForCheckout),
            "checkout_filter_shipping_methods" => Ok(Self::CheckoutFilterShippingMethods),
            "order_filter_shipping_methods" => Ok(Self::OrderFilterShippingMethods),
            _ => Err(format!("unknown event type: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for EventType {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventType {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl sqlx::Encode<'_, PgDb> for EventType {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_events_identified() {
        assert!(EventType::PaymentAuthorize.is_sync());
        assert!(EventType::OrderCalculateTaxes.is_sync());
        assert!(EventType::CheckoutFilterShippingMethods.is_sync());

        assert!(!EventType::OrderCreated.is_sync());
        assert!(!EventType::Observability.is_sync());
    }

    #[test]
    fn wire_names_round_trip() {
        let all = [
            EventType::OrderCreated,
            EventType::ProductVariantDeleted,
            EventType::Observability,
            EventType::PaymentListGateways,
            EventType::ShippingListMethodsForCheckout,
        ];
        for event_type in all {
            assert_eq!(event_type.as_str().parse::<EventType>(), Ok(event_type));
        }
    }

    #[test]
    fn unknown_event_type_rejected() {
        assert!("order_exploded".parse::<EventType>().is_err());
        assert!("".parse::<EventType>().is_err());
    }
}
