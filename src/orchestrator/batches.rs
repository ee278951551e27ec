//! Partitioning extracted pages into ingestion batches.

/// Default pages per ingestion request.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// One planned ingestion request covering `first_page..=last_page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    /// Ordinal within the run; `0` creates the index.
    pub index: u32,
    /// First 1-based page in the batch.
    pub first_page: u32,
    /// Last 1-based page in the batch.
    pub last_page: u32,
    /// Whether this batch completes the rulebook.
    pub is_last: bool,
}

impl BatchPlan {
    /// Whether `page_number` falls inside this batch.
    pub fn contains(&self, page_number: u32) -> bool {
        (self.first_page..=self.last_page).contains(&page_number)
    }
}

/// Split `page_count` pages into consecutive batches of at most `batch_size` pages.
pub fn plan_batches(page_count: u32, batch_size: usize) -> Vec<BatchPlan> {
    let size = batch_size.max(1) as u32;
    let total = page_count.div_ceil(size);
    (0..total)
        .map(|index| {
            let first_page = index * size + 1;
            BatchPlan {
                index,
                first_page,
                last_page: (first_page + size - 1).min(page_count),
                is_last: index + 1 == total,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixty_pages_in_batches_of_twenty_five() {
        let plans = plan_batches(60, 25);
        let spans: Vec<(u32, u32, bool)> = plans
            .iter()
            .map(|plan| (plan.first_page, plan.last_page, plan.is_last))
            .collect();
        assert_eq!(spans, vec![(1, 25, false), (26, 50, false), (51, 60, true)]);
    }

    #[test]
    fn only_the_final_ordinal_is_last() {
        for page_count in 1..=80u32 {
            for batch_size in [1usize, 7, 25, 100] {
                let plans = plan_batches(page_count, batch_size);
                let expected = page_count.div_ceil(batch_size as u32);
                assert_eq!(plans.len() as u32, expected);
                assert!(plans.iter().all(|plan| plan.is_last == (plan.index + 1 == expected)));
                let covered: u32 = plans.iter().map(|p| p.last_page - p.first_page + 1).sum();
                assert_eq!(covered, page_count);
            }
        }
    }

    #[test]
    fn empty_documents_have_no_batches() {
        assert!(plan_batches(0, 25).is_empty());
    }
}
