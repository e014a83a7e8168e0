//! Next-hop set normalization to the hardware ECMP width.

use std::collections::BTreeSet;
use swagent_state::route::NextHop;

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// `weight * max / total`, widened so no width can overflow it.
fn scale(weight: u32, max: u64, total: u64) -> u64 {
    let scaled = u128::from(weight) * u128::from(max) / u128::from(total.max(1));
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Fits `next_hops` into `max_width` hardware members.
///
/// Plain ECMP sets (all weights 0) keep their first `max_width` members in
/// sort order. Weighted (UCMP) sets whose total weight exceeds `max_width`
/// have their weights scaled down proportionally (each member keeps at least
/// weight 1), trimmed until the total fits, then divided by their common gcd.
/// Sets that already fit are returned unchanged.
pub fn normalize(next_hops: BTreeSet<NextHop>, max_width: usize) -> BTreeSet<NextHop> {
    if max_width == 0 {
        return next_hops;
    }
    let is_ucmp = next_hops.iter().any(|nh| nh.weight != 0);
    if !is_ucmp {
        if next_hops.len() <= max_width {
            return next_hops;
        }
        return next_hops.into_iter().take(max_width).collect();
    }

    // Members beyond the width cannot be programmed whatever their weight.
    let mut members: Vec<NextHop> = next_hops.into_iter().take(max_width).collect();
    for nh in members.iter_mut() {
        nh.weight = nh.weight.max(1);
    }

    let max = u64::try_from(max_width).unwrap_or(u64::MAX);
    let total: u64 = members.iter().map(|nh| u64::from(nh.weight)).sum();
    if total <= max {
        return members.into_iter().collect();
    }

    let mut weights: Vec<u64> = members
        .iter()
        .map(|nh| scale(nh.weight, max, total).max(1))
        .collect();
    let mut scaled_total: u64 = weights.iter().sum();
    while scaled_total > max {
        // Heaviest member loses one; the last such member in order on ties.
        let Some((idx, _)) = weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 1)
            .max_by_key(|(i, w)| (**w, *i))
        else {
            break;
        };
        weights[idx] -= 1;
        scaled_total -= 1;
    }

    let divisor = weights
        .iter()
        .fold(0u32, |acc, w| gcd(acc, u32::try_from(*w).unwrap_or(u32::MAX)));
    let divisor = divisor.max(1);
    members
        .into_iter()
        .zip(weights)
        .map(|(mut nh, w)| {
            nh.weight = u32::try_from(w).unwrap_or(u32::MAX) / divisor;
            nh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use swagent_state::InterfaceId;

    fn nh(last: u8, weight: u32) -> NextHop {
        NextHop::new(format!("10.0.0.{}", last).parse().unwrap())
            .with_interface(InterfaceId::new(1))
            .with_weight(weight)
    }

    fn weights(set: &BTreeSet<NextHop>) -> Vec<(String, u32)> {
        set.iter()
            .map(|nh| (nh.address.to_string(), nh.weight))
            .collect()
    }

    #[test]
    fn test_small_sets_untouched() {
        let set: BTreeSet<_> = [nh(1, 0), nh(2, 0)].into_iter().collect();
        assert_eq!(normalize(set.clone(), 64), set);

        let ucmp: BTreeSet<_> = [nh(1, 3), nh(2, 6)].into_iter().collect();
        assert_eq!(normalize(ucmp.clone(), 64), ucmp);
    }

    #[test]
    fn test_ecmp_truncated_in_order() {
        let set: BTreeSet<_> = (1..=5).map(|i| nh(i, 0)).collect();
        let out = normalize(set, 3);
        assert_eq!(
            weights(&out),
            vec![
                ("10.0.0.1".to_string(), 0),
                ("10.0.0.2".to_string(), 0),
                ("10.0.0.3".to_string(), 0)
            ]
        );
    }

    #[test]
    fn test_ucmp_scaled_and_reduced() {
        // total 40 > 8: 10*8/40 = 2, 30*8/40 = 6, gcd 2 -> 1:3
        let set: BTreeSet<_> = [nh(1, 10), nh(2, 30)].into_iter().collect();
        let out = normalize(set, 8);
        assert_eq!(
            weights(&out),
            vec![("10.0.0.1".to_string(), 1), ("10.0.0.2".to_string(), 3)]
        );
    }

    #[test]
    fn test_ucmp_rounding_fits_width() {
        // 1,1,100: scaled to 1,1,3 on width 4 would be 5, trimmed to 1,1,2
        let set: BTreeSet<_> = [nh(1, 1), nh(2, 1), nh(3, 100)].into_iter().collect();
        let out = normalize(set, 4);
        let total: u32 = out.iter().map(|nh| nh.weight).sum();
        assert!(total <= 4);
        assert_eq!(out.len(), 3);
        assert_eq!(out.iter().last().unwrap().weight, 2);
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let set: BTreeSet<_> = (1..=9).map(|i| nh(i, u32::from(i) * 7)).collect();
        assert_eq!(normalize(set.clone(), 16), normalize(set, 16));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_huge_width_does_not_overflow() {
        // u32::MAX * 2^33 does not fit in u64
        let set: BTreeSet<_> = (1..=3).map(|i| nh(i, u32::MAX)).collect();
        let out = normalize(set, 1 << 33);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|nh| nh.weight == 1));
    }
}
