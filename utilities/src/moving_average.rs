use std::collections::VecDeque;

pub struct MovingAverage {
    values: VecDeque<f32>,
    max_size: usize,
}

impl MovingAverage {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            values: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn add(&mut self, value: f32) {
        if self.values.len() >= self.max_size {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn average(&self) -> Option<f32> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f32>() / self.values.len() as f32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_only_the_latest_window() {
        let mut average = MovingAverage::new(3);
        assert_eq!(average.average(), None);

        for value in [10.0, 20.0, 30.0, 40.0] {
            average.add(value);
        }

        assert_eq!(average.average(), Some(30.0));
    }

    #[test]
    fn zero_window_still_holds_one_value() {
        let mut average = MovingAverage::new(0);
        average.add(1.0);
        average.add(5.0);
        assert_eq!(average.average(), Some(5.0));
    }
}
