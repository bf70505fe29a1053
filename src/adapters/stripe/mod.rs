//! Stripe adapter - provider REST client.

mod fetcher;

pub use fetcher::StripeRemoteFetcher;
