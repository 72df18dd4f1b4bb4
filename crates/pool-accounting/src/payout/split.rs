/// Splits `total` across `weights` proportionally, in integer units.
///
/// Every participant first gets the floor of its exact share. The units lost to
/// flooring are then handed out one each, largest fractional remainder first,
/// ties broken by key order, so the result always sums to `total` when any
/// weight is positive.
pub fn largest_remainder<K: Ord + Clone>(total: u64, weights: &[(K, u64)]) -> Vec<(K, u64)> {
    let weight_sum: u128 = weights.iter().map(|(_, w)| *w as u128).sum();
    if weight_sum == 0 {
        return weights.iter().map(|(k, _)| (k.clone(), 0)).collect();
    }

    let total = total as u128;
    let mut parts: Vec<(K, u64, u128)> = weights
        .iter()
        .map(|(k, w)| {
            let scaled = total * *w as u128;
            (k.clone(), (scaled / weight_sum) as u64, scaled % weight_sum)
        })
        .collect();

    let assigned: u128 = parts.iter().map(|(_, amount, _)| *amount as u128).sum();
    let leftover = (total - assigned) as usize;

    let mut order: Vec<usize> = (0..parts.len()).collect();
    order.sort_by(|&a, &b| parts[b].2.cmp(&parts[a].2).then_with(|| parts[a].0.cmp(&parts[b].0)));
    for &idx in order.iter().take(leftover) {
        parts[idx].1 += 1;
    }

    parts.into_iter().map(|(k, amount, _)| (k, amount)).collect()
}
