/*
 *  Copyright (c) 2012 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::FrameBudgetTracker;

// Leaky-bucket frame dropper. The ledger accumulates the kilobits the
// encoder actually produced; each processed frame leaks the per-frame
// share of the target bitrate. Frames should be dropped while the ledger
// exceeds half a second's worth of the target rate. Dropped frames still
// leak, so a run of drops drains the debt and the stream recovers on its
// own.
pub struct FrameDropper {
    enabled: bool,
    accumulator_kbits: f64,
    accumulator_max_kbits: f64,
    target_bitrate_kbps: f64,
    incoming_frame_rate: f64,
    // Kilobits of large frames not yet booked into the ledger, surfaced in
    // equal chunks over the next pending_frames leaks.
    pending_kbits: f64,
    pending_frames: u32,
}

impl FrameDropper {
    // Ledger allowance, in seconds of target bitrate.
    const ACCUMULATOR_CAP_SECONDS: f64 = 0.5;
    // Debt never exceeds this multiple of the allowance.
    const ACCUMULATOR_OVERSHOOT_FACTOR: f64 = 2.0;
    // Delta frames above this multiple of the per-frame budget are
    // amortized like key frames.
    const LARGE_DELTA_FACTOR: f64 = 3.0;
    // Large frames are spread over this much leak time.
    const LARGE_FRAME_SPREAD_SECONDS: f64 = 0.5;

    pub fn new() -> Self {
        Self {
            enabled: true,
            accumulator_kbits: 0.0,
            accumulator_max_kbits: 0.0,
            target_bitrate_kbps: 0.0,
            incoming_frame_rate: 0.0,
            pending_kbits: 0.0,
            pending_frames: 0,
        }
    }

    // Outstanding debt relative to the ledger allowance. Above 1.0 frames
    // are dropped.
    pub fn budget_ratio(&self) -> f64 {
        if self.accumulator_max_kbits == 0.0 {
            return 0.0;
        }
        self.accumulator_kbits / self.accumulator_max_kbits
    }

    fn per_frame_budget_kbits(&self) -> f64 {
        if self.incoming_frame_rate <= 0.0 {
            return 0.0;
        }
        self.target_bitrate_kbps / self.incoming_frame_rate
    }

    fn cap_accumulator(&mut self) {
        let cap = Self::ACCUMULATOR_OVERSHOOT_FACTOR * self.accumulator_max_kbits;
        if self.accumulator_kbits > cap {
            self.accumulator_kbits = cap;
        }
    }
}

impl Default for FrameDropper {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBudgetTracker for FrameDropper {
    fn reset(&mut self) {
        self.accumulator_kbits = 0.0;
        self.pending_kbits = 0.0;
        self.pending_frames = 0;
    }

    fn set_rates(&mut self, bitrate_kbps: f64, frame_rate_hz: f64) {
        let bitrate_kbps = bitrate_kbps.max(0.0);
        // Scale the outstanding debt so the overshoot relative to the new
        // rate is preserved.
        if self.target_bitrate_kbps > 0.0 {
            self.accumulator_kbits *= bitrate_kbps / self.target_bitrate_kbps;
        }
        self.target_bitrate_kbps = bitrate_kbps;
        self.incoming_frame_rate = frame_rate_hz.max(0.0);
        self.accumulator_max_kbits = bitrate_kbps * Self::ACCUMULATOR_CAP_SECONDS;
        self.cap_accumulator();
    }

    fn fill(&mut self, size_bytes: usize, delta_frame: bool) {
        if !self.enabled {
            return;
        }
        if self.target_bitrate_kbps <= 0.0 {
            // No rate configured, nothing to budget against.
            return;
        }
        let size_kbits = size_bytes as f64 * 8.0 / 1000.0;
        let large_frame_threshold = Self::LARGE_DELTA_FACTOR * self.per_frame_budget_kbits();
        if delta_frame && size_kbits <= large_frame_threshold {
            self.accumulator_kbits += size_kbits;
        } else {
            // Key frames and oversized delta frames are amortized over the
            // following leaks so a single large frame does not force an
            // immediate burst of drops.
            let spread = (self.incoming_frame_rate * Self::LARGE_FRAME_SPREAD_SECONDS)
                .round()
                .max(1.0) as u32;
            self.pending_kbits += size_kbits;
            self.pending_frames = self.pending_frames.max(spread);
        }
        self.cap_accumulator();
    }

    fn leak(&mut self, input_frame_rate: u32) {
        if !self.enabled {
            return;
        }
        if input_frame_rate < 1 {
            return;
        }
        if self.target_bitrate_kbps <= 0.0 {
            return;
        }
        if self.pending_frames > 0 {
            // Book one chunk of an amortized large frame.
            let chunk = self.pending_kbits / self.pending_frames as f64;
            self.accumulator_kbits += chunk;
            self.pending_kbits -= chunk;
            self.pending_frames -= 1;
        }
        self.accumulator_kbits -= self.target_bitrate_kbps / input_frame_rate as f64;
        if self.accumulator_kbits < 0.0 {
            self.accumulator_kbits = 0.0;
        }
        self.cap_accumulator();
    }

    fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn drop_frame(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.accumulator_max_kbits > 0.0 && self.accumulator_kbits > self.accumulator_max_kbits
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn no_drop_without_rates() {
        let mut dropper = FrameDropper::new();
        dropper.fill(100_000, true);
        dropper.fill(100_000, false);
        dropper.leak(30);
        assert!(!dropper.drop_frame());
        assert_relative_eq!(dropper.budget_ratio(), 0.0);
    }

    #[test]
    fn under_budget_stream_never_drops() {
        let mut dropper = FrameDropper::new();
        dropper.set_rates(300.0, 30.0);
        // 1000 bytes per frame at 30 fps is 240 kbps, well under target.
        for _ in 0..100 {
            dropper.leak(30);
            assert!(!dropper.drop_frame());
            dropper.fill(1000, true);
        }
        // The per-frame leak fully covers the per-frame fill.
        assert!(dropper.budget_ratio() < 0.1);
    }

    #[test]
    fn sustained_overshoot_drops() {
        let mut dropper = FrameDropper::new();
        dropper.set_rates(300.0, 30.0);
        // 2500 bytes per frame at 30 fps is 600 kbps, twice the target: the
        // debt grows 10 kbits per frame against a 150 kbit allowance.
        let mut frames_until_drop = 0;
        for _ in 0..40 {
            dropper.fill(2500, true);
            dropper.leak(30);
            frames_until_drop += 1;
            if dropper.drop_frame() {
                break;
            }
        }
        assert_eq!(frames_until_drop, 16);
    }

    #[test]
    fn recovers_once_debt_is_drained() {
        let mut dropper = FrameDropper::new();
        dropper.set_rates(300.0, 30.0);
        for _ in 0..16 {
            dropper.fill(2500, true);
            dropper.leak(30);
        }
        assert!(dropper.drop_frame());
        // Dropped frames produce no fill but still leak.
        dropper.leak(30);
        assert!(!dropper.drop_frame());
    }

    #[test]
    fn key_frame_is_amortized() {
        let mut dropper = FrameDropper::new();
        dropper.set_rates(300.0, 30.0);
        // A 50 kB key frame is 400 kbits, over double the whole allowance,
        // but it must not flip the decision before any of it is booked.
        dropper.fill(50_000, false);
        assert!(!dropper.drop_frame());
        let mut leaks_until_drop = 0;
        for _ in 0..15 {
            dropper.leak(30);
            leaks_until_drop += 1;
            if dropper.drop_frame() {
                break;
            }
        }
        assert!(dropper.drop_frame());
        assert!((6..=12).contains(&leaks_until_drop));
    }

    #[test]
    fn oversized_delta_frame_is_amortized() {
        let mut dropper = FrameDropper::new();
        dropper.set_rates(300.0, 30.0);
        // Per-frame budget is 10 kbits; 300 kbits exceeds the 3x threshold,
        // and each booked chunk (20 kbits) outweighs the per-frame leak.
        dropper.fill(37_500, true);
        assert_relative_eq!(dropper.budget_ratio(), 0.0);
        dropper.leak(30);
        assert!(dropper.budget_ratio() > 0.0);
    }

    #[test]
    fn debt_is_rescaled_on_rate_change() {
        let mut dropper = FrameDropper::new();
        dropper.set_rates(300.0, 30.0);
        // Build 120 kbits of debt, under the 150 kbit allowance.
        for _ in 0..5 {
            dropper.fill(3000, true);
        }
        assert!(!dropper.drop_frame());
        // At 60 kbps the debt scales to 24 kbits against a 30 kbit
        // allowance. Without rescaling the old debt would be clamped to 60
        // kbits and every frame would drop.
        dropper.set_rates(60.0, 30.0);
        assert!(!dropper.drop_frame());
        assert_relative_eq!(dropper.budget_ratio(), 24.0 / 30.0, epsilon = 1e-9);
    }

    #[test]
    fn disabled_dropper_never_drops() {
        let mut dropper = FrameDropper::new();
        dropper.set_rates(300.0, 30.0);
        for _ in 0..16 {
            dropper.fill(2500, true);
            dropper.leak(30);
        }
        assert!(dropper.drop_frame());
        dropper.enable(false);
        assert!(!dropper.drop_frame());
        dropper.enable(true);
        assert!(dropper.drop_frame());
    }

    #[test]
    fn reset_clears_the_ledger() {
        let mut dropper = FrameDropper::new();
        dropper.set_rates(300.0, 30.0);
        dropper.fill(50_000, false);
        for _ in 0..16 {
            dropper.fill(2500, true);
            dropper.leak(30);
        }
        assert!(dropper.drop_frame());
        dropper.reset();
        assert!(!dropper.drop_frame());
        assert_relative_eq!(dropper.budget_ratio(), 0.0);
        // Rates survive a reset; only the ledger is gone.
        dropper.fill(2500, true);
        dropper.leak(30);
        assert_relative_eq!(dropper.budget_ratio(), 10.0 / 150.0);
    }
}
