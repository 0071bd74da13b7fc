/*
 *  Copyright (c) 2012 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

// Byte-budget tracker driven by MediaOptimization. Implemented as a leaky
// bucket: encoded output fills the ledger, every processed frame leaks one
// frame-interval's worth, and the drop decision reports whether the ledger
// has outgrown its allowance.
pub trait FrameBudgetTracker: Send {
    // Clears the accumulated byte ledger.
    fn reset(&mut self);

    // Reprograms the leak rate targets.
    fn set_rates(&mut self, bitrate_kbps: f64, frame_rate_hz: f64);

    // Adds the bytes of one encoded frame to the ledger. Key frames may be
    // weighted differently than delta frames.
    fn fill(&mut self, size_bytes: usize, delta_frame: bool);

    // Drains the ledger by one frame-interval's worth at the given incoming
    // frame rate.
    fn leak(&mut self, input_frame_rate: u32);

    // Toggles whether drop_frame can ever return true.
    fn enable(&mut self, enabled: bool);

    // Drop decision given the current ledger state.
    fn drop_frame(&mut self) -> bool;
}
