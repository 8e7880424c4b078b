use rust_decimal::Decimal;

/// Order line and invoice arithmetic over unit-price snapshots
pub struct PriceCalculator;

impl PriceCalculator {
    /// Subtotal for an order line (quantity * unit_price)
    pub fn calculate_subtotal(quantity: i32, unit_price: Decimal) -> Decimal {
        Decimal::from(quantity) * unit_price
    }

    /// Total price for an order (sum of line subtotals)
    pub fn calculate_total(subtotals: &[Decimal]) -> Decimal {
        subtotals.iter().sum()
    }

    /// Total of `(quantity, unit_price)` lines
    pub fn total_of<I>(lines: I) -> Decimal
    where
        I: IntoIterator<Item = (i32, Decimal)>,
    {
        lines
            .into_iter()
            .map(|(quantity, unit_price)| Self::calculate_subtotal(quantity, unit_price))
            .sum()
    }
}
