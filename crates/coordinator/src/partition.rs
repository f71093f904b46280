use std::path::PathBuf;

/// Deterministic partition of a filename-sorted file list into at most
/// `n_workers` batches (`spec.md` §4.4 `group_worker_files`).
///
/// Files are sorted by filename on entry (schema then table prefix), so a
/// naive `chunk_size = max(len/n_workers, 1)` chunking tends to keep a
/// table's files together within one chunk. Integer division can leave one
/// remainder chunk past `n_workers`; rather than grow past the requested
/// worker count, its files are redistributed round-robin into the
/// remaining chunks. This never drops or duplicates a file (`spec.md` §8
/// invariant 4): every file is moved, exactly once, from the popped surplus
/// chunk into some existing chunk.
pub fn group_worker_files(files: &[PathBuf], n_workers: usize) -> Vec<Vec<PathBuf>> {
    let n_workers = n_workers.max(1);
    if files.is_empty() {
        return Vec::new();
    }
    let chunk_size = (files.len() / n_workers).max(1);
    let mut batches: Vec<Vec<PathBuf>> = files.chunks(chunk_size).map(|c| c.to_vec()).collect();

    while batches.len() > n_workers {
        let surplus = batches.pop().expect("batches.len() > n_workers >= 1 implies non-empty");
        let target_count = batches.len();
        for (i, file) in surplus.into_iter().enumerate() {
            let target = i % target_count;
            batches[target].push(file);
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("s.t.jsonl.{i:03}.jsonl"))).collect()
    }

    #[test]
    fn partitions_exactly_with_no_loss_or_duplication() {
        let input = files(17);
        let batches = group_worker_files(&input, 4);
        assert!(batches.len() <= 4);

        let mut flat: Vec<_> = batches.into_iter().flatten().collect();
        flat.sort();
        let mut expected = input.clone();
        expected.sort();
        assert_eq!(flat, expected);
    }

    #[test]
    fn never_exceeds_requested_worker_count() {
        for n in [1usize, 2, 3, 5, 8, 13] {
            let input = files(23);
            let batches = group_worker_files(&input, n);
            assert!(batches.len() <= n, "n={n} produced {} batches", batches.len());
        }
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(group_worker_files(&[], 4).is_empty());
    }

    #[test]
    fn single_worker_yields_one_batch() {
        let input = files(10);
        let batches = group_worker_files(&input, 1);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 10);
    }
}
