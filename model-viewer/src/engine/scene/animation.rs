use bevy::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Step,
    Linear,
}

/// Values that can be blended between two keyframes.
pub trait Keyframe: Copy {
    fn blend(a: Self, b: Self, t: f32) -> Self;
}

impl Keyframe for Vec3 {
    fn blend(a: Self, b: Self, t: f32) -> Self {
        a.lerp(b, t)
    }
}

impl Keyframe for Quat {
    fn blend(a: Self, b: Self, t: f32) -> Self {
        a.slerp(b, t)
    }
}

impl Keyframe for Mat4 {
    fn blend(a: Self, b: Self, t: f32) -> Self {
        let (sa, ra, ta) = a.to_scale_rotation_translation();
        let (sb, rb, tb) = b.to_scale_rotation_translation();
        Mat4::from_scale_rotation_translation(sa.lerp(sb, t), ra.slerp(rb, t), ta.lerp(tb, t))
    }
}

/// Keyframed values sorted by time.
#[derive(Debug, Clone)]
pub struct Track<T> {
    times: Vec<f32>,
    values: Vec<T>,
    interpolation: Interpolation,
}

impl<T: Keyframe> Track<T> {
    /// Pairs keys with values. Returns `None` for empty or mismatched input.
    pub fn new(times: Vec<f32>, values: Vec<T>, interpolation: Interpolation) -> Option<Self> {
        if times.is_empty() || times.len() != values.len() {
            return None;
        }
        let mut keys: Vec<(f32, T)> = times.into_iter().zip(values).collect();
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (times, values) = keys.into_iter().unzip();
        Some(Self {
            times,
            values,
            interpolation,
        })
    }

    pub fn start(&self) -> f32 {
        self.times[0]
    }

    pub fn end(&self) -> f32 {
        self.times[self.times.len() - 1]
    }

    /// Value at `time`, holding the first and last keys outside the range.
    pub fn sample(&self, time: f32) -> T {
        let next = self.times.partition_point(|&key| key <= time);
        if next == 0 {
            return self.values[0];
        }
        if next >= self.times.len() {
            return self.values[self.values.len() - 1];
        }

        let previous = next - 1;
        match self.interpolation {
            Interpolation::Step => self.values[previous],
            Interpolation::Linear => {
                let span = self.times[next] - self.times[previous];
                let t = if span > 0.0 {
                    (time - self.times[previous]) / span
                } else {
                    0.0
                };
                T::blend(self.values[previous], self.values[next], t)
            }
        }
    }
}

/// Map a running clock onto a looping `[start, end]` range.
pub fn wrap_time(elapsed: f64, start: f64, end: f64) -> f64 {
    let length = end - start;
    if length <= 0.0 {
        return start;
    }
    start + elapsed.rem_euclid(length)
}

/// Compose local matrices into model-space matrices.
/// Nodes must be ordered so that every parent precedes its children.
pub fn compose_globals(parents: &[Option<usize>], locals: &[Mat4]) -> Vec<Mat4> {
    let mut globals: Vec<Mat4> = Vec::with_capacity(locals.len());
    for (index, local) in locals.iter().enumerate() {
        let global = match parents.get(index).copied().flatten() {
            Some(parent) if parent < index => globals[parent] * *local,
            _ => *local,
        };
        globals.push(global);
    }
    globals
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linear_track_blends_between_keys() {
        let track = Track::new(
            vec![0.0, 2.0],
            vec![Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)],
            Interpolation::Linear,
        )
        .unwrap();
        assert_relative_eq!(track.sample(1.0).x, 2.0);
        assert_relative_eq!(track.sample(-1.0).x, 0.0);
        assert_relative_eq!(track.sample(9.0).x, 4.0);
    }

    #[test]
    fn step_track_holds_previous_key() {
        let track = Track::new(
            vec![1.0, 0.0],
            vec![Vec3::ONE, Vec3::ZERO],
            Interpolation::Step,
        )
        .unwrap();
        assert_eq!(track.sample(0.99), Vec3::ZERO);
        assert_eq!(track.sample(1.0), Vec3::ONE);
    }

    #[test]
    fn mismatched_tracks_are_rejected() {
        assert!(Track::<Vec3>::new(vec![0.0], vec![], Interpolation::Linear).is_none());
    }

    #[test]
    fn wrap_time_loops_inside_the_range() {
        assert_relative_eq!(wrap_time(5.0, 1.0, 3.0), 2.0);
        assert_relative_eq!(wrap_time(0.5, 1.0, 3.0), 1.5);
        assert_relative_eq!(wrap_time(5.0, 2.0, 2.0), 2.0);
    }

    #[test]
    fn globals_chain_through_parents() {
        let locals = [
            Mat4::from_translation(Vec3::X),
            Mat4::from_translation(Vec3::Y),
            Mat4::from_translation(Vec3::Z),
        ];
        let globals = compose_globals(&[None, Some(0), Some(1)], &locals);
        assert_eq!(globals[2].transform_point3(Vec3::ZERO), Vec3::ONE);
    }
}
