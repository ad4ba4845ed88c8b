use std::collections::{BTreeMap, HashMap};

use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::TrainError;
use crate::corpus::LabeledExample;
use crate::labels::LabelMap;

/// Labels with fewer examples than this are oversampled up to it.
pub const MIN_EXAMPLES_PER_LABEL: usize = 5;

/// Duplicates examples of rare labels cyclically, in their original order,
/// until each label has at least [`MIN_EXAMPLES_PER_LABEL`]. Returns true when
/// anything was added.
pub fn oversample_min_classes(data: &mut Vec<LabeledExample>) -> bool {
    let mut by_label: Vec<(String, Vec<usize>)> = Vec::new();
    for (i, example) in data.iter().enumerate() {
        match by_label.iter_mut().find(|(label, _)| *label == example.label) {
            Some((_, indices)) => indices.push(i),
            None => by_label.push((example.label.clone(), vec![i])),
        }
    }

    let mut added = false;
    for (label, indices) in by_label {
        let missing = MIN_EXAMPLES_PER_LABEL.saturating_sub(indices.len());
        if missing == 0 {
            continue;
        }
        info!("Oversampling '{}' from {} to {}", label, indices.len(), MIN_EXAMPLES_PER_LABEL);
        for k in 0..missing {
            let copy = data[indices[k % indices.len()]].clone();
            data.push(copy);
        }
        added = true;
    }
    added
}

/// `max(ceil(ratio * n), num_labels)`.
pub fn eval_size(n: usize, num_labels: usize, ratio: f64) -> usize {
    let proportional = (ratio * n as f64).ceil() as usize;
    proportional.max(num_labels)
}

/// Per-label validation counts summing to `total`: proportional shares with
/// largest-remainder rounding, each kept within `[1, count - 1]`.
fn allocate(counts: &[usize], total: usize) -> Vec<usize> {
    let n: usize = counts.iter().sum();
    let mut alloc = Vec::with_capacity(counts.len());
    let mut remainders = Vec::with_capacity(counts.len());
    for (i, &count) in counts.iter().enumerate() {
        let exact = total as f64 * count as f64 / n as f64;
        let floor = (exact.floor() as usize).clamp(1, count - 1);
        alloc.push(floor);
        remainders.push((exact - exact.floor(), i));
    }
    // largest remainder first, ties by label order
    remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut assigned: usize = alloc.iter().sum();
    while assigned < total {
        let before = assigned;
        for &(_, i) in &remainders {
            if assigned == total {
                break;
            }
            if alloc[i] < counts[i] - 1 {
                alloc[i] += 1;
                assigned += 1;
            }
        }
        if assigned == before {
            break;
        }
    }
    while assigned > total {
        let before = assigned;
        for &(_, i) in remainders.iter().rev() {
            if assigned == total {
                break;
            }
            if alloc[i] > 1 {
                alloc[i] -= 1;
                assigned -= 1;
            }
        }
        if assigned == before {
            break;
        }
    }
    alloc
}

/// Splits `data` into `(train, eval)` with every label on both sides.
pub fn stratified_split(
    data: &[LabeledExample],
    labels: &LabelMap,
    eval_ratio: f64,
    rng: &mut StdRng,
) -> Result<(Vec<LabeledExample>, Vec<LabeledExample>), TrainError> {
    let n = data.len();
    let k = labels.len();
    let target = eval_size(n, k, eval_ratio);
    if target >= n {
        return Err(TrainError::Split(format!(
            "validation size {} is not smaller than the corpus size {}",
            target, n
        )));
    }
    if n - target < k {
        return Err(TrainError::Split(format!(
            "{} training slots for {} labels",
            n - target,
            k
        )));
    }

    let mut groups: BTreeMap<usize, Vec<&LabeledExample>> = BTreeMap::new();
    for example in data {
        let id = labels
            .id(&example.label)
            .ok_or_else(|| TrainError::Split(format!("unknown label '{}'", example.label)))?;
        groups.entry(id).or_default().push(example);
    }
    if let Some((id, group)) = groups.iter().find(|(_, g)| g.len() < 2) {
        return Err(TrainError::Split(format!(
            "label '{}' has {} example(s), at least 2 are needed",
            labels.label(*id).unwrap_or_default(),
            group.len()
        )));
    }

    let counts: Vec<usize> = groups.values().map(Vec::len).collect();
    let alloc = allocate(&counts, target);

    let mut train = Vec::with_capacity(n - target);
    let mut eval = Vec::with_capacity(target);
    for (group, take) in groups.into_values().zip(alloc) {
        let mut group: Vec<LabeledExample> = group.into_iter().cloned().collect();
        group.shuffle(rng);
        let rest = group.split_off(take);
        eval.extend(group);
        train.extend(rest);
    }
    train.shuffle(rng);
    eval.shuffle(rng);
    Ok((train, eval))
}

/// `1 / freq^max(0, power)`, rescaled so the weights average to 1. Indexed
/// by label id.
pub fn class_weights(train: &[LabeledExample], labels: &LabelMap, power: f64) -> Vec<f32> {
    let power = power.max(0.0);
    let mut freq: HashMap<usize, usize> = HashMap::new();
    for example in train {
        if let Some(id) = labels.id(&example.label) {
            *freq.entry(id).or_default() += 1;
        }
    }

    let inverse: Vec<f64> = (0..labels.len())
        .map(|id| {
            let f = freq.get(&id).copied().unwrap_or(1).max(1) as f64;
            1.0 / f.powf(power)
        })
        .collect();
    let mean = inverse.iter().sum::<f64>() / inverse.len() as f64;
    inverse.iter().map(|w| (w / mean) as f32).collect()
}
