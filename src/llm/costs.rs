//! Per-model token prices (USD per token).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (model prefix, input cost per token, output cost per token).
const PRICES: &[(&str, Decimal, Decimal)] = &[
    ("claude-3-haiku", dec!(0.00000025), dec!(0.00000125)),
    ("claude-3-5-haiku", dec!(0.0000008), dec!(0.000004)),
    ("claude-3-sonnet", dec!(0.000003), dec!(0.000015)),
    ("claude-3-5-sonnet", dec!(0.000003), dec!(0.000015)),
    ("claude-sonnet-4", dec!(0.000003), dec!(0.000015)),
    ("claude-3-opus", dec!(0.000015), dec!(0.000075)),
    ("gpt-3.5-turbo", dec!(0.0000005), dec!(0.0000015)),
    ("gpt-4-turbo", dec!(0.00001), dec!(0.00003)),
    ("gpt-4o-mini", dec!(0.00000015), dec!(0.0000006)),
    ("gpt-4o", dec!(0.0000025), dec!(0.00001)),
];

/// Look up the price of a model. Unknown models cost nothing.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    // Longest prefix wins so "gpt-4o-mini" is not priced as "gpt-4o".
    PRICES
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or_else(|| {
            tracing::debug!(model, "No price known for model, charging zero");
            (Decimal::ZERO, Decimal::ZERO)
        })
}

/// Total cost of one call.
pub fn call_cost(per_token: (Decimal, Decimal), input_tokens: u32, output_tokens: u32) -> Decimal {
    per_token.0 * Decimal::from(input_tokens) + per_token.1 * Decimal::from(output_tokens)
}
