//! Coin selection.
//!
//! Largest-first greedy selection: sort the candidates by value descending
//! and take coins until the target is covered. It tends to minimize the
//! input count, which keeps transactions small, at the cost of leaving dust
//! behind. Good enough for a wallet that is not trying to optimize fees.

use super::coin::Coin;
use crate::transaction::types::Amount;

/// Result of a selection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub coins: Vec<Coin>,
    /// Sum of the selected coins.
    pub total: Amount,
}

impl Selection {
    /// What is left over after paying `target`. Zero when nothing was
    /// selected or the target was hit exactly.
    pub fn change(&self, target: Amount) -> Amount {
        self.total.saturating_sub(target)
    }
}

/// Select coins covering `target`, or `None` if the candidates fall short.
///
/// A zero target selects nothing.
pub fn select_largest_first<I>(candidates: I, target: Amount) -> Option<Selection>
where
    I: IntoIterator<Item = Coin>,
{
    if target == 0 {
        return Some(Selection { coins: Vec::new(), total: 0 });
    }

    let mut sorted: Vec<Coin> = candidates.into_iter().collect();
    // Ties broken by id so the choice is reproducible.
    sorted.sort_by(|a, b| b.value().cmp(&a.value()).then_with(|| a.id.cmp(&b.id)));

    let mut selected = Vec::new();
    let mut total: Amount = 0;
    for coin in sorted {
        if total >= target {
            break;
        }
        total = total.checked_add(coin.value())?;
        selected.push(coin);
    }

    (total >= target).then_some(Selection { coins: selected, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::types::{AssetId, CoinId, KeyType};
    use crate::vault::coin::CoinStatus;

    fn coin(idx: u64, value: Amount) -> Coin {
        Coin::new(
            CoinId { idx, key_type: KeyType::Regular, asset_id: AssetId::BASE, value },
            CoinStatus::Available,
            None,
        )
    }

    #[test]
    fn picks_largest_first() {
        let sel = select_largest_first(vec![coin(1, 10), coin(2, 500), coin(3, 40)], 100).unwrap();
        assert_eq!(sel.coins.len(), 1);
        assert_eq!(sel.total, 500);
        assert_eq!(sel.change(100), 400);
    }

    #[test]
    fn combines_coins_when_needed() {
        let sel = select_largest_first(vec![coin(1, 30), coin(2, 50), coin(3, 40)], 85).unwrap();
        assert_eq!(sel.total, 90);
        assert_eq!(sel.change(85), 5);
    }

    #[test]
    fn exact_match_has_no_change() {
        let sel = select_largest_first(vec![coin(1, 60), coin(2, 40)], 100).unwrap();
        assert_eq!(sel.change(100), 0);
    }

    #[test]
    fn insufficient_returns_none() {
        assert!(select_largest_first(vec![coin(1, 30), coin(2, 20)], 51).is_none());
        assert!(select_largest_first(Vec::new(), 1).is_none());
    }

    #[test]
    fn zero_target_selects_nothing() {
        let sel = select_largest_first(vec![coin(1, 30)], 0).unwrap();
        assert!(sel.coins.is_empty());
        assert_eq!(sel.total, 0);
    }
}
