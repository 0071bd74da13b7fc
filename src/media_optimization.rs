/*
 *  Copyright (c) 2012 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::{Clock, FrameBudgetTracker, FrameDropper};

// Number of frame arrival times kept for the incoming frame rate estimate.
const FRAME_COUNT_HISTORY_SIZE: usize = 90;
// Arrivals older than this are not used for the estimate.
const FRAME_HISTORY_WIN_MS: i64 = 2000;

// Sender-side media optimization. Tracks the incoming capture frame rate
// from frame arrival times and drives a byte-budget tracker so the encoded
// stream stays within the bitrate allocated by the bandwidth estimator.
//
// One instance is shared between the capture/encode path (drop_frame,
// update_with_encoded_data, input_frame_rate) and the network path
// (set_target_rates, set_encoding_data, reset). Every operation takes the
// internal lock for its whole duration; there is no ordering guarantee
// between the two paths beyond mutual exclusion.
pub struct MediaOptimization {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

struct State {
    max_bit_rate: i32,
    video_target_bitrate: u32,
    user_frame_rate: f64,
    frame_dropper: Box<dyn FrameBudgetTracker>,
    incoming_frame_times: VecDeque<i64>,
    incoming_frame_rate: f64,
}

impl MediaOptimization {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_budget_tracker(clock, Box::new(FrameDropper::new()))
    }

    // Substitutes the byte-budget tracker, e.g. with a recording double.
    pub fn with_budget_tracker(
        clock: Arc<dyn Clock>,
        frame_dropper: Box<dyn FrameBudgetTracker>,
    ) -> Self {
        Self {
            clock,
            state: Mutex::new(State {
                max_bit_rate: 0,
                video_target_bitrate: 0,
                user_frame_rate: 0.0,
                frame_dropper,
                incoming_frame_times: VecDeque::with_capacity(FRAME_COUNT_HISTORY_SIZE),
                incoming_frame_rate: 0.0,
            }),
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.set_encoding_data_internal(0, 0, 0.0);
        state.incoming_frame_times.clear();
        state.incoming_frame_rate = 0.0;
    }

    // Full reconfiguration, called whenever the active codec changes. The
    // frame arrival history is kept; the budget tracker starts over.
    pub fn set_encoding_data(&self, max_bit_rate: i32, target_bitrate: u32, frame_rate: f64) {
        tracing::info!(
            "Setting encoding data: max bitrate {} bps, target bitrate {} bps, frame rate {} fps",
            max_bit_rate,
            target_bitrate,
            frame_rate
        );
        let mut state = self.state.lock().unwrap();
        state.set_encoding_data_internal(max_bit_rate, target_bitrate, frame_rate);
    }

    // Applies a new bandwidth estimate and returns the effective target
    // after capping.
    pub fn set_target_rates(&self, target_bitrate: u32) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.set_target_rates_internal(target_bitrate)
    }

    // Current incoming frame rate estimate, rounded to the nearest frame.
    pub fn input_frame_rate(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.input_frame_rate_internal(self.clock.time_millis())
    }

    // Feeds one encoded frame into the byte budget. Zero-length input
    // (e.g. a frame the encoder dropped) is ignored.
    pub fn update_with_encoded_data(&self, encoded_length: usize, delta_frame: bool) {
        let mut state = self.state.lock().unwrap();
        if encoded_length > 0 {
            state.frame_dropper.fill(encoded_length, delta_frame);
        }
    }

    pub fn enable_frame_dropper(&self, enable: bool) {
        let mut state = self.state.lock().unwrap();
        state.frame_dropper.enable(enable);
    }

    // Per-frame decision, called right before a frame is handed to the
    // encoder. Records the arrival, refreshes the frame rate estimate and
    // asks the budget tracker whether the frame should be skipped.
    pub fn drop_frame(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.update_incoming_frame_rate(self.clock.time_millis());
        // Leak appropriate number of bytes for one frame interval.
        let frame_rate = state.rounded_frame_rate();
        state.frame_dropper.leak(frame_rate);
        state.frame_dropper.drop_frame()
    }
}

impl State {
    fn set_encoding_data_internal(&mut self, max_bit_rate: i32, target_bitrate: u32, frame_rate: f64) {
        // Everything codec specific should be reset here since this means
        // the codec has changed.
        self.max_bit_rate = max_bit_rate;
        self.video_target_bitrate = target_bitrate;
        let target_bitrate_kbps = target_bitrate as f64 / 1000.0;
        self.frame_dropper.reset();
        self.frame_dropper.set_rates(target_bitrate_kbps, frame_rate);
        self.user_frame_rate = frame_rate;
    }

    fn set_target_rates_internal(&mut self, target_bitrate: u32) -> u32 {
        self.video_target_bitrate = target_bitrate;

        // Cap target video bitrate to codec maximum.
        if self.max_bit_rate > 0 && self.video_target_bitrate > self.max_bit_rate as u32 {
            self.video_target_bitrate = self.max_bit_rate as u32;
        }

        let target_video_bitrate_kbps = self.video_target_bitrate as f64 / 1000.0;
        let mut frame_rate = self.incoming_frame_rate;
        if frame_rate == 0.0 {
            // No frame rate estimate available, use configured frame rate instead.
            frame_rate = self.user_frame_rate;
        }

        self.frame_dropper
            .set_rates(target_video_bitrate_kbps, frame_rate);

        self.video_target_bitrate
    }

    fn input_frame_rate_internal(&mut self, now: i64) -> u32 {
        self.process_incoming_frame_rate(now);
        self.rounded_frame_rate()
    }

    fn rounded_frame_rate(&self) -> u32 {
        (u32::MAX as f64).min(self.incoming_frame_rate + 0.5) as u32
    }

    fn update_incoming_frame_rate(&mut self, now: i64) {
        if self.incoming_frame_times.len() == FRAME_COUNT_HISTORY_SIZE {
            self.incoming_frame_times.pop_back();
        }
        self.incoming_frame_times.push_front(now);
        self.process_incoming_frame_rate(now);
    }

    // Recomputes the incoming frame rate from the arrival history. The scan
    // walks from the second-newest arrival outward and stops at the first
    // entry that fell out of the trailing window.
    fn process_incoming_frame_rate(&mut self, now: i64) {
        self.incoming_frame_rate = 0.0;
        let newest = match self.incoming_frame_times.front() {
            Some(&t) => t,
            None => return,
        };
        let mut nr_of_frames: u32 = 0;
        let mut oldest_used = newest;
        for &t in self
            .incoming_frame_times
            .iter()
            .skip(1)
            .take(FRAME_COUNT_HISTORY_SIZE - 2)
        {
            // Don't use data older than 2 s.
            if now - t > FRAME_HISTORY_WIN_MS {
                break;
            }
            nr_of_frames += 1;
            oldest_used = t;
        }
        if nr_of_frames == 0 {
            // A single usable sample is not enough for an estimate.
            return;
        }
        let diff = newest - oldest_used;
        if diff > 0 {
            self.incoming_frame_rate = nr_of_frames as f64 * 1000.0 / diff as f64;
        } else if diff < 0 {
            tracing::warn!("Frame arrival times are not monotonic, no frame rate estimate");
        }
    }
}
