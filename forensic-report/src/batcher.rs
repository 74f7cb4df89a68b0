use crate::models::{Batch, DocumentContent};

/// Partition documents into contiguous batches of at most `max_batch_size`.
///
/// Order is preserved and no document is dropped or duplicated; only the last
/// batch may be shorter. A size of zero is treated as one.
pub fn batch_documents(documents: Vec<DocumentContent>, max_batch_size: usize) -> Vec<Batch> {
    let size = max_batch_size.max(1);
    let mut batches = Vec::with_capacity(documents.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);

    for document in documents {
        current.push(document);
        if current.len() == size {
            batches.push(Batch {
                index: batches.len(),
                documents: std::mem::replace(&mut current, Vec::with_capacity(size)),
            });
        }
    }
    if !current.is_empty() {
        batches.push(Batch {
            index: batches.len(),
            documents: current,
        });
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(n: usize) -> Vec<DocumentContent> {
        (0..n).map(|i| DocumentContent::new(format!("doc {i}"))).collect()
    }

    #[test]
    fn partitions_without_loss() {
        for n in 0..12 {
            for size in 1..6 {
                let input = docs(n);
                let batches = batch_documents(input.clone(), size);

                let flattened: Vec<DocumentContent> = batches
                    .iter()
                    .flat_map(|b| b.documents.iter().cloned())
                    .collect();
                assert_eq!(flattened, input, "n={n} size={size}");
                assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
                assert_eq!(batches.len(), n.div_ceil(size));
                for (i, batch) in batches.iter().enumerate() {
                    assert_eq!(batch.index, i);
                }
            }
        }
    }

    #[test]
    fn seven_documents_in_threes() {
        let lengths: Vec<usize> = batch_documents(docs(7), 3).iter().map(Batch::len).collect();
        assert_eq!(lengths, vec![3, 3, 1]);
    }

    #[test]
    fn empty_input_gives_no_batches() {
        assert!(batch_documents(Vec::new(), 3).is_empty());
    }

    #[test]
    fn zero_size_is_clamped() {
        assert_eq!(batch_documents(docs(2), 0).len(), 2);
    }
}
