use super::kline::PriceLevel;
use exchange::{Price, Qty};

/// One drawable footprint row, possibly covering several adjacent levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderBucket {
    pub price: Price,
    pub bid_qty: Qty,
    pub ask_qty: Qty,
}

impl From<&PriceLevel> for RenderBucket {
    fn from(level: &PriceLevel) -> Self {
        Self {
            price: level.price,
            bid_qty: level.bid_qty,
            ask_qty: level.ask_qty,
        }
    }
}

/// Levels per bucket needed to fit `len` levels into `max_rows` rows.
pub fn group_size(len: usize, max_rows: usize) -> usize {
    if max_rows == 0 {
        return 0;
    }
    len.div_ceil(max_rows).max(1)
}

/// Compresses levels (sorted descending by price) into at most `max_rows` buckets.
///
/// Below the budget every level maps to its own bucket. Above it, contiguous
/// groups of `ceil(len / max_rows)` levels are summed and represented by the
/// price of their middle element.
pub fn bucket(levels: &[PriceLevel], max_rows: usize) -> Vec<RenderBucket> {
    if max_rows == 0 {
        return vec![];
    }
    if levels.len() <= max_rows {
        return levels.iter().map(RenderBucket::from).collect();
    }

    let size = group_size(levels.len(), max_rows);

    levels
        .chunks(size)
        .map(|group| {
            let (bid_qty, ask_qty) = group
                .iter()
                .fold((Qty::ZERO, Qty::ZERO), |(bid, ask), level| {
                    (bid + level.bid_qty, ask + level.ask_qty)
                });

            RenderBucket {
                price: group[group.len() / 2].price,
                bid_qty,
                ask_qty,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(n: i64) -> Vec<PriceLevel> {
        (0..n)
            .rev()
            .map(|i| PriceLevel {
                price: Price::from_units(i * 100_000_000),
                bid_qty: Qty::from_units(i + 1),
                ask_qty: Qty::from_units(2 * i),
            })
            .collect()
    }

    #[test]
    fn verbatim_when_within_budget() {
        let input = levels(5);
        let out = bucket(&input, 5);
        assert_eq!(out.len(), 5);
        for (level, row) in input.iter().zip(&out) {
            assert_eq!(RenderBucket::from(level), *row);
        }
        assert_eq!(bucket(&input, 50).len(), 5);
    }

    #[test]
    fn zero_rows_renders_nothing() {
        assert!(bucket(&levels(10), 0).is_empty());
        assert!(bucket(&[], 4).is_empty());
    }

    #[test]
    fn grouping_conserves_volume() {
        let input = levels(23);
        let out = bucket(&input, 5);

        let size = group_size(input.len(), 5);
        assert_eq!(size, 5);
        assert_eq!(out.len(), input.len().div_ceil(size));
        assert!(out.len() <= 5);

        let bid: Qty = input.iter().map(|l| l.bid_qty).sum();
        let ask: Qty = input.iter().map(|l| l.ask_qty).sum();
        assert_eq!(out.iter().map(|b| b.bid_qty).sum::<Qty>(), bid);
        assert_eq!(out.iter().map(|b| b.ask_qty).sum::<Qty>(), ask);
    }

    #[test]
    fn representative_is_the_middle_element() {
        let input = levels(7);
        let out = bucket(&input, 3);

        // groups of 3: [6,5,4] [3,2,1] [0]
        let prices: Vec<_> = out.iter().map(|b| b.price).collect();
        assert_eq!(prices, vec![input[1].price, input[4].price, input[6].price]);
    }

    #[test]
    fn output_stays_ordered_descending() {
        let out = bucket(&levels(101), 10);
        assert!(out.windows(2).all(|w| w[0].price > w[1].price));
    }
}
