use crate::core::model::Fragment;

pub fn plan_ranges(total: u64, chunk_size: u64) -> Vec<Fragment> {
    let chunk_size = chunk_size.max(1);
    let mut frags = Vec::new();
    let mut offset = 0u64;
    while offset < total {
        let len = (total - offset).min(chunk_size);
        frags.push(Fragment { offset, len });
        offset += len;
    }
    frags
}
