//! Order pricing.
//!
//! Everything here is pure arithmetic over the checkout payload; nothing
//! touches the database. Item prices arrive as JSON numbers or numeric
//! strings and are summed as exact decimals. Fees are tolerated in any
//! shape the storefront sends: absent, negative or unparseable fee values
//! fold to zero rather than failing checkout, while an unparseable item
//! price is a hard validation error.

use crate::errors::ServiceError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use strum::{Display, EnumString, IntoStaticStr};
use utoipa::ToSchema;

/// How the finished order reaches the customer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
    ToSchema,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceType {
    Delivery,
    Pickup,
    Zasilkovna,
    CeskaPosta,
    Ppl,
    Dpd,
    Gls,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// The shop's own courier carries no delivery surcharge; every other
    /// fulfilment channel adds the configured fee.
    pub fn waives_delivery_fee(&self) -> bool {
        matches!(self, ServiceType::Delivery)
    }

    /// Zásilkovna orders are undeliverable without a chosen pickup point.
    pub fn requires_pickup_point(&self) -> bool {
        matches!(self, ServiceType::Zasilkovna)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    #[error("Item at position {position} has an invalid price: {raw}")]
    InvalidPrice { position: usize, raw: String },
}

impl From<PriceError> for ServiceError {
    fn from(err: PriceError) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// Priced breakdown of an order, all components rounded to cents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub payment_fee: Decimal,
    pub total: Decimal,
}

/// Parses a JSON value as a price. Accepts numbers and numeric strings,
/// including scientific notation; anything else is `None`.
pub fn parse_price(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };

    if text.is_empty() {
        return None;
    }

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Folds a fee value to a usable amount: missing, unparseable or negative
/// fees all become zero.
pub fn normalize_fee(value: Option<&Value>) -> Decimal {
    value
        .and_then(parse_price)
        .filter(|fee| fee.is_sign_positive())
        .unwrap_or(Decimal::ZERO)
}

/// Prices an order from its raw cart.
///
/// The subtotal is the sum of all item prices; any item whose price does
/// not parse fails the quote with the item's position. The delivery fee is
/// added for every service type except the shop's own courier, and the
/// payment fee is added when positive.
pub fn quote_order(
    item_prices: &[Value],
    service_type: ServiceType,
    delivery_fee: Option<&Value>,
    payment_fee: Option<&Value>,
) -> Result<Quote, PriceError> {
    let mut subtotal = Decimal::ZERO;
    for (position, raw) in item_prices.iter().enumerate() {
        let price = parse_price(raw).ok_or_else(|| PriceError::InvalidPrice {
            position,
            raw: raw.to_string(),
        })?;
        subtotal += price;
    }

    let delivery = if service_type.waives_delivery_fee() {
        Decimal::ZERO
    } else {
        normalize_fee(delivery_fee)
    };
    let payment = normalize_fee(payment_fee);

    let round = |d: Decimal| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    Ok(Quote {
        subtotal: round(subtotal),
        delivery_fee: round(delivery),
        payment_fee: round(payment),
        total: round(subtotal + delivery + payment),
    })
}
