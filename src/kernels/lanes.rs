//! Host model of a subgroup's registers and lane exchange
//!
//! Mirrors `subgroupShuffleDown` in the WGSL kernels: lane `i` receives the
//! value of lane `i + delta`, or keeps its own when that lane does not exist.

use crate::element::Accumulator;

/// One value per lane of a subgroup
#[derive(Debug, Clone, PartialEq)]
pub struct Subgroup<Acc> {
    lanes: Vec<Acc>,
}

impl<Acc: Accumulator> Subgroup<Acc> {
    /// Every lane holds `value`
    pub fn splat(width: usize, value: Acc) -> Self {
        Self {
            lanes: vec![value; width],
        }
    }

    /// Lane `i` holds `f(i)`
    pub fn from_fn(width: usize, f: impl FnMut(usize) -> Acc) -> Self {
        Self {
            lanes: (0..width).map(f).collect(),
        }
    }

    /// Number of lanes
    pub fn width(&self) -> usize {
        self.lanes.len()
    }

    /// Register of `lane`
    pub fn lane(&self, lane: usize) -> Acc {
        self.lanes[lane]
    }

    /// Mutable register of `lane`
    pub fn lane_mut(&mut self, lane: usize) -> &mut Acc {
        &mut self.lanes[lane]
    }

    /// Lane `i` receives lane `i + delta`
    pub fn shuffle_down(&self, delta: usize) -> Self {
        Self::from_fn(self.width(), |i| {
            self.lanes.get(i + delta).copied().unwrap_or(self.lanes[i])
        })
    }

    /// Power-of-two halving: add the value `width/2`, `width/4`, … 1 lanes
    /// down. Lane 0 ends up holding the sum of all lanes; other lanes hold
    /// partial garbage, as on hardware.
    ///
    /// # Panics
    ///
    /// If the width is not a power of two.
    pub fn reduce_to_lane0(mut self) -> Acc {
        let width = self.width();
        assert!(width.is_power_of_two(), "subgroup width {width} is not a power of two");

        let mut offset = width / 2;
        while offset > 0 {
            let shifted = self.shuffle_down(offset);
            for (value, incoming) in self.lanes.iter_mut().zip(shifted.lanes) {
                *value = value.combine(incoming);
            }
            offset /= 2;
        }
        self.lanes[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shuffle_down_keeps_own_value_past_end() {
        let sg = Subgroup::from_fn(4, |i| i as i32 * 10);
        let shifted = sg.shuffle_down(1);
        assert_eq!(shifted, Subgroup::from_fn(4, |i| [10, 20, 30, 30][i]));
    }

    #[test]
    fn test_reduce_sums_every_lane() {
        let sg = Subgroup::from_fn(32, |i| i as i32 + 1);
        assert_eq!(sg.reduce_to_lane0(), 32 * 33 / 2);
    }

    #[test]
    fn test_reduce_single_lane() {
        assert_eq!(Subgroup::splat(1, 7.5f32).reduce_to_lane0(), 7.5);
    }

    #[test]
    fn test_reduce_tree_shape() {
        // 8 lanes: offsets 4, 2, 1. After offset 4, lane 0 holds v0+v4.
        let sg = Subgroup::from_fn(8, |i| 1i32 << i);
        let after_first = {
            let shifted = sg.shuffle_down(4);
            sg.lane(0) + shifted.lane(0)
        };
        assert_eq!(after_first, 1 | 16);
        assert_eq!(sg.reduce_to_lane0(), 0xFF);
    }

    #[test]
    #[should_panic(expected = "not a power of two")]
    fn test_non_power_of_two_width_panics() {
        let _ = Subgroup::splat(6, 1i32).reduce_to_lane0();
    }
}
