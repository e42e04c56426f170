//! Hasher selection for the concurrent maps behind the lock registry and the
//! location cache. Uses gxhash when the feature is enabled (requires AES-NI /
//! SSE2), the std SipHash builder otherwise.

/// Build hasher for `DashMap`s keyed by lock keys and document ids
#[cfg(feature = "gxhash")]
pub type FastBuildHasher = gxhash::GxBuildHasher;

/// Build hasher for `DashMap`s keyed by lock keys and document ids
#[cfg(not(feature = "gxhash"))]
pub type FastBuildHasher = std::hash::RandomState;
