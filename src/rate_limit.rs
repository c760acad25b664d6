// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Token buckets bounding the replay path
//
// Replay waits for tokens; live publishes debit the same buckets without
// waiting (possibly into debt), so live traffic takes bandwidth away from
// replay rather than queueing behind it.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate_per_sec: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket starting full with `burst` tokens, refilled at `rate_per_sec`
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        let capacity = burst.max(1.0);
        Self {
            rate_per_sec,
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    pub fn rate_per_sec(&self) -> f64 {
        self.rate_per_sec
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Requests larger than the burst size go through once the bucket is full
    fn threshold(&self, amount: f64) -> f64 {
        amount.min(self.capacity)
    }

    /// Time until `amount` could be taken; zero when available now
    pub fn wait_time(&mut self, amount: f64) -> Duration {
        self.refill();
        let missing = self.threshold(amount) - self.tokens;
        if missing <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(missing / self.rate_per_sec)
        }
    }

    pub fn try_take(&mut self, amount: f64) -> Result<(), Duration> {
        let wait = self.wait_time(amount);
        if wait.is_zero() {
            self.tokens -= amount;
            Ok(())
        } else {
            Err(wait)
        }
    }

    /// Unconditional debit; the bucket may go negative
    pub fn debit(&mut self, amount: f64) {
        self.refill();
        self.tokens -= amount;
    }

    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}

/// Message-rate and byte-rate limits applied together
#[derive(Debug, Clone)]
pub struct ReplayThrottle {
    msgs: TokenBucket,
    bytes: TokenBucket,
}

impl ReplayThrottle {
    /// Bursts are a tenth of a second worth of tokens
    pub fn new(msgs_per_sec: u32, bytes_per_sec: u64) -> Self {
        let msgs_per_sec = f64::from(msgs_per_sec.max(1));
        let bytes_per_sec = bytes_per_sec.max(1) as f64;
        Self {
            msgs: TokenBucket::new(msgs_per_sec, msgs_per_sec / 10.0),
            bytes: TokenBucket::new(bytes_per_sec, bytes_per_sec / 10.0),
        }
    }

    /// Wait until one message of `len` bytes may be replayed, then take it
    pub async fn acquire(&mut self, len: u64) {
        let len = len as f64;
        loop {
            let wait = self.msgs.wait_time(1.0).max(self.bytes.wait_time(len));
            if wait.is_zero() {
                self.msgs.tokens -= 1.0;
                self.bytes.tokens -= len;
                return;
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant of [`acquire`](Self::acquire)
    pub fn try_acquire(&mut self, len: u64) -> Result<(), Duration> {
        let len = len as f64;
        let wait = self.msgs.wait_time(1.0).max(self.bytes.wait_time(len));
        if wait.is_zero() {
            self.msgs.tokens -= 1.0;
            self.bytes.tokens -= len;
            Ok(())
        } else {
            Err(wait)
        }
    }

    /// Account for a live publish sharing the same bandwidth
    pub fn debit_live(&mut self, len: u64) {
        self.msgs.debit(1.0);
        self.bytes.debit(len as f64);
    }

    /// Time to replay `frames` frames totalling `bytes` at the current limits
    pub fn estimate_drain(&self, frames: u64, bytes: u64) -> Duration {
        let by_msgs = frames as f64 / self.msgs.rate_per_sec();
        let by_bytes = bytes as f64 / self.bytes.rate_per_sec();
        Duration::from_secs_f64(by_msgs.max(by_bytes))
    }
}
