use rust_decimal::Decimal;

use super::Position;
use crate::execution::Fill;

/// Rebuild a position from its complete fill history.
///
/// Fills are replayed oldest first against a zeroed position. Records that
/// belong elsewhere or carry impossible numbers are logged and skipped; the
/// rebuild never fails, and running it twice over the same fills gives the
/// same position.
pub fn rebuild_position(account_id: &str, symbol: &str, fills: &[Fill]) -> Position {
    let mut ordered: Vec<&Fill> = fills.iter().collect();
    // stable: fills sharing a timestamp keep their receipt order
    ordered.sort_by_key(|f| f.timestamp);

    let mut position = Position::new(account_id, symbol);
    let mut skipped = 0usize;

    for fill in ordered {
        if let Some(problem) = malformed(fill, account_id, symbol) {
            tracing::warn!(
                fill_id = %fill.id,
                order_id = %fill.order_id,
                problem,
                "Skipping malformed fill during rebuild"
            );
            skipped += 1;
            continue;
        }
        position.apply_fill(fill.side, fill.amount, fill.price, fill.fee, fill.timestamp);
    }

    tracing::debug!(
        account_id,
        symbol,
        fills = fills.len(),
        skipped,
        amount = %position.amount,
        "Position rebuilt from fills"
    );

    position
}

fn malformed(fill: &Fill, account_id: &str, symbol: &str) -> Option<&'static str> {
    if fill.account_id != account_id || fill.symbol != symbol {
        return Some("fill belongs to another position");
    }
    if fill.amount <= Decimal::ZERO {
        return Some("non-positive amount");
    }
    if fill.price <= Decimal::ZERO {
        return Some("non-positive price");
    }
    if fill.fee < Decimal::ZERO {
        return Some("negative fee");
    }
    None
}
