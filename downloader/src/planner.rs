/// Range planning: split a known-length resource into contiguous byte ranges.
use hermes_shared::{ByteRange, PlanError};

/// Partition `[0, size)` into `workers` inclusive ranges.
///
/// Every range but the last holds exactly `size / workers` bytes; the last one
/// ends at `size - 1` and absorbs the division remainder.
pub fn plan(size: u64, workers: usize) -> Result<Vec<ByteRange>, PlanError> {
    if size == 0 {
        return Err(PlanError::InvalidSize(size));
    }
    if workers == 0 {
        return Err(PlanError::InvalidWorkerCount(workers));
    }
    if workers as u64 > size || workers > u32::MAX as usize {
        return Err(PlanError::TooManyWorkers { workers, size });
    }

    let count = workers as u64;
    let base = size / count;

    let ranges = (0..count)
        .map(|i| {
            let start = i * base;
            let end = if i == count - 1 { size - 1 } else { start + base - 1 };
            ByteRange::new(i as u32, start, end)
        })
        .collect();

    Ok(ranges)
}

/// Clamp a requested worker count so every planned range holds at least one byte.
pub fn effective_workers(size: u64, workers: usize) -> usize {
    let cap = usize::try_from(size).unwrap_or(usize::MAX);
    workers.clamp(1, cap.max(1))
}
