//! Parallel bitonic sort over key/value pairs, and the offset pass that
//! turns a sorted pair array into a per-key start table.

use crate::compute::{Buffer, ComputeDevice, Kernel};

/// Bucket key plus the item stored in that bucket.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KeyValue {
    pub key: u32,
    pub value: u32,
}

impl KeyValue {
    #[inline]
    pub const fn new(key: u32, value: u32) -> Self {
        Self { key, value }
    }

    #[inline]
    pub(crate) const fn to_bits(self) -> u64 {
        (self.key as u64) << 32 | self.value as u64
    }

    #[inline]
    pub(crate) const fn from_bits(bits: u64) -> Self {
        Self {
            key: (bits >> 32) as u32,
            value: bits as u32,
        }
    }
}

/// One compare-exchange sub-step of the network.
struct BitonicStepKernel<'a> {
    pairs: &'a Buffer<KeyValue>,
    group_width: usize,
    group_height: usize,
    step_index: usize,
}

impl Kernel for BitonicStepKernel<'_> {
    fn execute(&self, i: usize) {
        let h = i & (self.group_width - 1);
        let left = h + (self.group_height + 1) * (i / self.group_width);
        let right_step = if self.step_index == 0 {
            self.group_height - 2 * h
        } else {
            (self.group_height + 1) / 2
        };
        let right = left + right_step;

        // Padding slots past the real length act as +inf and never move.
        if right >= self.pairs.len() {
            return;
        }

        let a = self.pairs.get(left);
        let b = self.pairs.get(right);
        if a.key > b.key {
            self.pairs.set(left, b);
            self.pairs.set(right, a);
        }
    }
}

struct OffsetKernel<'a> {
    pairs: &'a Buffer<KeyValue>,
    offsets: &'a Buffer<u32>,
}

impl Kernel for OffsetKernel<'_> {
    fn execute(&self, id: usize) {
        let key = self.pairs.get(id).key;
        let starts_run = id == 0 || self.pairs.get(id - 1).key != key;
        // Sentinel keys fall outside the table and are skipped.
        if starts_run && (key as usize) < self.offsets.len() {
            self.offsets.set(key as usize, id as u32);
        }
    }
}

pub struct BitonicSort;

impl BitonicSort {
    /// log2 of the padded length.
    pub fn stage_count(len: usize) -> u32 {
        if len <= 1 {
            return 0;
        }
        len.next_power_of_two().trailing_zeros()
    }

    /// Sort `pairs` ascending by key. Values with equal keys end up in an
    /// unspecified order.
    pub fn sort(device: &ComputeDevice, pairs: &Buffer<KeyValue>) {
        let len = pairs.len();
        let stages = Self::stage_count(len) as usize;
        let workers = len.next_power_of_two() / 2;

        for stage in 0..stages {
            for step in 0..=stage {
                let group_width = 1usize << (stage - step);
                let kernel = BitonicStepKernel {
                    pairs,
                    group_width,
                    group_height: 2 * group_width - 1,
                    step_index: step,
                };
                device.dispatch(workers, &kernel);
                device.barrier(pairs);
            }
        }
    }

    /// Record, for each key present in the sorted `pairs`, the index of its
    /// first occurrence into `offsets[key]`. Entries for absent keys are left
    /// untouched.
    pub fn calculate_offsets(device: &ComputeDevice, pairs: &Buffer<KeyValue>, offsets: &Buffer<u32>) {
        device.dispatch(pairs.len(), &OffsetKernel { pairs, offsets });
        device.barrier(offsets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSettings;
    use proptest::prelude::*;

    fn device() -> ComputeDevice {
        ComputeDevice::new(&DeviceSettings {
            threads: 2,
            group_size: 16,
        })
        .unwrap()
    }

    #[test]
    fn stage_count_pads_to_power_of_two() {
        assert_eq!(BitonicSort::stage_count(0), 0);
        assert_eq!(BitonicSort::stage_count(1), 0);
        assert_eq!(BitonicSort::stage_count(2), 1);
        assert_eq!(BitonicSort::stage_count(5), 3);
        assert_eq!(BitonicSort::stage_count(8), 3);
        assert_eq!(BitonicSort::stage_count(9), 4);
    }

    #[test]
    fn sentinels_sort_to_the_end() {
        let device = device();
        let data = [
            KeyValue::new(5, 0),
            KeyValue::new(u32::MAX, 1),
            KeyValue::new(2, 2),
            KeyValue::new(0, 3),
            KeyValue::new(u32::MAX, 4),
            KeyValue::new(2, 5),
        ];
        let pairs = Buffer::from_slice("pairs", &data);
        BitonicSort::sort(&device, &pairs);

        let keys: Vec<u32> = pairs.to_vec().iter().map(|kv| kv.key).collect();
        assert_eq!(keys, vec![0, 2, 2, 5, u32::MAX, u32::MAX]);

        let offsets: Buffer<u32> = Buffer::filled("offsets", 6, 99);
        BitonicSort::calculate_offsets(&device, &pairs, &offsets);
        assert_eq!(offsets.to_vec(), vec![0, 99, 1, 99, 99, 3]);
    }

    proptest! {
        #[test]
        fn sort_orders_keys_and_keeps_pairs(keys in prop::collection::vec(0u32..64, 0..300)) {
            let device = device();
            let input: Vec<KeyValue> = keys
                .iter()
                .enumerate()
                .map(|(i, &k)| KeyValue::new(k, i as u32))
                .collect();
            let pairs = Buffer::from_slice("pairs", &input);
            BitonicSort::sort(&device, &pairs);
            let output = pairs.to_vec();

            prop_assert!(output.windows(2).all(|w| w[0].key <= w[1].key));

            let mut expected = input.clone();
            let mut actual = output.clone();
            expected.sort_unstable_by_key(|kv| (kv.key, kv.value));
            actual.sort_unstable_by_key(|kv| (kv.key, kv.value));
            prop_assert_eq!(expected, actual);
        }

        #[test]
        fn offsets_point_at_first_occurrence(keys in prop::collection::vec(0u32..32, 1..200)) {
            let device = device();
            let mut sorted: Vec<KeyValue> = keys
                .iter()
                .enumerate()
                .map(|(i, &k)| KeyValue::new(k, i as u32))
                .collect();
            sorted.sort_unstable_by_key(|kv| kv.key);

            let pairs = Buffer::from_slice("pairs", &sorted);
            let offsets: Buffer<u32> = Buffer::filled("offsets", 32, u32::MAX);
            BitonicSort::calculate_offsets(&device, &pairs, &offsets);

            for key in 0..32u32 {
                let first = sorted.iter().position(|kv| kv.key == key);
                match first {
                    Some(idx) => prop_assert_eq!(offsets.get(key as usize), idx as u32),
                    None => prop_assert_eq!(offsets.get(key as usize), u32::MAX),
                }
            }
        }
    }
}
