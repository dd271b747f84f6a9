//! Profiles
//!
//! Declarative field mapping and the fetcher that applies it to provider
//! responses.

pub mod fetcher;
pub mod mapping;

pub use fetcher::{
    create_mock_profile_fetcher, openid_mapping, DefaultProfileFetcher, MockProfileFetcher,
    ProfileFetcher,
};
pub use mapping::{
    lookup, stringify, value_is_truthy, FieldMapping, FieldRule, FieldSource, SideChannelLookup,
    Transform,
};
