/// Rate limiter for the "source returned nothing" diagnostic.
///
/// During a transport outage the source can report an empty receive many
/// times per second. The first occurrence of a run is reported, then once
/// every `interval` consecutive occurrences. A received message resets the
/// run.
#[derive(Clone, Debug)]
pub struct EmptyReceiveThrottle {
    interval: u64,
    consecutive: u64,
}

impl EmptyReceiveThrottle {
    /// An `interval` of zero is treated as one (report every occurrence).
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            consecutive: 0,
        }
    }

    /// Record one empty receive. Returns `true` when it should be logged.
    pub fn record(&mut self) -> bool {
        let report = self.consecutive % self.interval == 0;
        self.consecutive = self.consecutive.saturating_add(1);
        report
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Length of the current run of empty receives.
    pub fn consecutive(&self) -> u64 {
        self.consecutive
    }
}
