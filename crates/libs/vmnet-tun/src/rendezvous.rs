use std::sync::mpsc as std_mpsc;

/// Sending half of a one-shot rendezvous. Consumed by [`Signal::signal`], so a
/// completion can fire it at most once.
#[derive(Debug)]
pub struct Signal<T> {
    tx: std_mpsc::SyncSender<T>,
}

/// Waiting half of a one-shot rendezvous.
#[derive(Debug)]
pub struct Rendezvous<T> {
    rx: std_mpsc::Receiver<T>,
}

pub fn rendezvous<T>() -> (Signal<T>, Rendezvous<T>) {
    let (tx, rx) = std_mpsc::sync_channel(1);
    (Signal { tx }, Rendezvous { rx })
}

impl<T> Signal<T> {
    pub fn signal(self, value: T) {
        // The waiter may already be gone; nothing left to wake in that case.
        let _ = self.tx.send(value);
    }
}

impl<T> Rendezvous<T> {
    /// Blocks until the signal fires. There is no timeout: the call only
    /// returns early, with `None`, when the signal is dropped unfired.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::rendezvous;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_value_signalled_from_another_thread() {
        let (signal, waiter) = rendezvous();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signal.signal(42_u32);
        });
        assert_eq!(waiter.wait(), Some(42));
        worker.join().expect("join signalling thread");
    }

    #[test]
    fn signal_before_wait_is_not_lost() {
        let (signal, waiter) = rendezvous();
        signal.signal("done");
        assert_eq!(waiter.wait(), Some("done"));
    }

    #[test]
    fn dropped_signal_releases_the_waiter() {
        let (signal, waiter) = rendezvous::<()>();
        drop(signal);
        assert_eq!(waiter.wait(), None);
    }

    #[test]
    fn signalling_after_waiter_is_gone_is_harmless() {
        let (signal, waiter) = rendezvous();
        drop(waiter);
        signal.signal(7_u8);
    }
}
