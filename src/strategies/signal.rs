use ethers::types::U256;
use crate::data::types::DecodedFillEvent;
use crate::strategies::types::{IdempotencyKey, Side, TradeSignal};

/// Fixed-point scale of the buy-side price.
pub const PRICE_SCALE: u64 = 1_000_000;

/// Derives the copy signal for a fill.
///
/// The tracked party's own asset id decides direction: paying the cash leg
/// (asset id zero) means buying the counter asset, anything else means
/// selling its own token. When both parties are tracked the maker wins.
/// Price is only defined for buys; sells carry no price.
pub fn extract(
    event: &DecodedFillEvent,
    maker_tracked: bool,
    taker_tracked: bool,
) -> Option<TradeSignal> {
    let (trader, own_asset, own_amount, counter_asset, counter_amount) = if maker_tracked {
        (
            event.maker,
            event.maker_asset_id,
            event.maker_amount_filled,
            event.taker_asset_id,
            event.taker_amount_filled,
        )
    } else if taker_tracked {
        (
            event.taker,
            event.taker_asset_id,
            event.taker_amount_filled,
            event.maker_asset_id,
            event.maker_amount_filled,
        )
    } else {
        return None;
    };

    let (side, token_id, amount) = if own_asset.is_zero() {
        (Side::Buy, counter_asset, counter_amount)
    } else {
        (Side::Sell, own_asset, own_amount)
    };

    let price = match side {
        Side::Buy => buy_price(counter_amount, own_amount),
        Side::Sell => None,
    };

    Some(TradeSignal {
        trader,
        side,
        token_id,
        amount,
        price,
        source_tx_hash: event.transaction_hash,
        key: IdempotencyKey::new(event.transaction_hash, event.order_hash),
        block_number: event.block_number,
        log_index: event.log_index,
    })
}

fn buy_price(counter_amount: U256, own_amount: U256) -> Option<U256> {
    if own_amount.is_zero() {
        return None;
    }
    counter_amount
        .checked_mul(U256::from(PRICE_SCALE))
        .map(|scaled| scaled / own_amount)
}
