use tokio::sync::watch;

/// How a [`Completion`] settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    Canceled,
}

impl<T> Outcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Canceled => None,
        }
    }
}

/// A single-assignment signal. The first `complete` or `cancel` wins and
/// every waiter, early or late, observes that outcome.
#[derive(Debug)]
pub struct Completion<T> {
    slot: watch::Sender<Option<Outcome<T>>>,
}

impl<T: Clone> Completion<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    /// Returns `false` if the signal had already settled.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Outcome::Completed(value))
    }

    pub fn cancel(&self) -> bool {
        self.settle(Outcome::Canceled)
    }

    pub fn peek(&self) -> Option<Outcome<T>> {
        self.slot.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub async fn wait(&self) -> Outcome<T> {
        let mut receiver = self.slot.subscribe();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(settled) => settled.clone().unwrap_or(Outcome::Canceled),
            Err(_) => Outcome::Canceled,
        };
        outcome
    }

    fn settle(&self, outcome: Outcome<T>) -> bool {
        let mut outcome = Some(outcome);
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}
