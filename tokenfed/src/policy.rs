//! Authorization of verified identities

use std::{iter, slice};

use thiserror::Error;

use crate::{Identity, IdentityRef};

/// Indicates the verified caller is not one of the identities permitted
/// to access a controlled resource
#[derive(Clone, Debug, Hash, Eq, PartialEq, Error)]
#[error("identity {identity} is not permitted")]
pub struct Unauthorized {
    /// The verified identity that was refused
    pub identity: Identity,
}

/// An access policy over verified identities
///
/// The policy holds a set of permitted identities and allows a caller only if
/// its verified identity is exactly equal to one of them. There are no
/// prefix or wildcard matches. A policy with no identities denies everything.
///
/// # Examples
///
/// ## Deny all callers
/// ```
/// use tokenfed_traits::Policy;
/// use tokenfed::{IdentityPolicy, IdentityRef};
///
/// let policy = IdentityPolicy::deny_all();
///
/// let caller = IdentityRef::from_str("system:serviceaccount:default:admin-user");
/// assert!(policy.evaluate(caller).is_err());
/// ```
///
/// ## Allow a single identity
/// ```
/// use tokenfed_traits::Policy;
/// use tokenfed::{Identity, IdentityPolicy, IdentityRef};
///
/// let policy = IdentityPolicy::allow_one(
///     Identity::from_static("system:serviceaccount:default:admin-user"),
/// );
///
/// let admin = IdentityRef::from_str("system:serviceaccount:default:admin-user");
/// assert!(policy.evaluate(admin).is_ok());
///
/// let other = IdentityRef::from_str("system:serviceaccount:default:admin-user-2");
/// assert!(policy.evaluate(other).is_err());
/// ```
///
/// ## Allow any of several identities
/// ```
/// use tokenfed::{IdentityPolicy, IdentityRef};
///
/// let policy: IdentityPolicy = [
///     "system:serviceaccount:default:admin-user",
///     "system:serviceaccount:ops:deployer",
/// ]
/// .into_iter()
/// .collect();
///
/// assert!(policy.permits(IdentityRef::from_str("system:serviceaccount:ops:deployer")));
/// assert!(!policy.permits(IdentityRef::from_str("system:serviceaccount:ops")));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct IdentityPolicy {
    inner: IdentityPolicyInner,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum IdentityPolicyInner {
    DenyAll,
    AllowOne(Identity),
    AllowMany(Vec<Identity>),
}

impl Default for IdentityPolicy {
    #[inline]
    fn default() -> Self {
        Self::deny_all()
    }
}

impl IdentityPolicy {
    /// Constructs a policy that permits no identities
    #[inline]
    pub const fn deny_all() -> Self {
        Self {
            inner: IdentityPolicyInner::DenyAll,
        }
    }

    /// Constructs a policy that permits exactly this identity
    #[inline]
    pub const fn allow_one(identity: Identity) -> Self {
        Self {
            inner: IdentityPolicyInner::AllowOne(identity),
        }
    }

    /// Adds an alternate permitted identity
    pub fn or_allow(self, identity: Identity) -> Self {
        if self.permits(&identity) {
            return self;
        }

        match self.inner {
            IdentityPolicyInner::DenyAll => Self::allow_one(identity),
            IdentityPolicyInner::AllowOne(existing) => Self {
                inner: IdentityPolicyInner::AllowMany(vec![existing, identity]),
            },
            IdentityPolicyInner::AllowMany(mut identities) => {
                identities.push(identity);
                Self {
                    inner: IdentityPolicyInner::AllowMany(identities),
                }
            }
        }
    }

    /// Adds an alternate permitted identity
    pub fn allow(&mut self, identity: Identity) {
        let this = std::mem::take(self);
        *self = this.or_allow(identity);
    }

    /// Whether the identity is exactly one of the permitted identities
    pub fn permits(&self, identity: &IdentityRef) -> bool {
        self.iter()
            .any(|permitted| permitted.as_str() == identity.as_str())
    }

    /// Whether the policy denies every identity
    pub fn is_deny_all(&self) -> bool {
        matches!(self.inner, IdentityPolicyInner::DenyAll)
    }

    /// Iterates over the permitted identities
    pub fn iter(&self) -> Iter<'_> {
        let inner = match &self.inner {
            IdentityPolicyInner::DenyAll => IterInner::Empty,
            IdentityPolicyInner::AllowOne(identity) => IterInner::One(iter::once(identity)),
            IdentityPolicyInner::AllowMany(identities) => IterInner::Many(identities.iter()),
        };
        Iter { inner }
    }
}

impl tokenfed_traits::Policy for IdentityPolicy {
    type Request = IdentityRef;
    type Denial = Unauthorized;

    fn evaluate(&self, identity: &Self::Request) -> Result<(), Self::Denial> {
        if self.permits(identity) {
            Ok(())
        } else {
            Err(Unauthorized {
                identity: identity.to_owned(),
            })
        }
    }
}

impl<I: Into<Identity>> FromIterator<I> for IdentityPolicy {
    fn from_iter<T: IntoIterator<Item = I>>(iter: T) -> Self {
        let mut policy = Self::deny_all();
        policy.extend(iter);
        policy
    }
}

impl<I: Into<Identity>> Extend<I> for IdentityPolicy {
    fn extend<T: IntoIterator<Item = I>>(&mut self, iter: T) {
        for identity in iter {
            self.allow(identity.into());
        }
    }
}

impl<'a> IntoIterator for &'a IdentityPolicy {
    type Item = &'a Identity;
    type IntoIter = Iter<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the identities permitted by an [`IdentityPolicy`]
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    inner: IterInner<'a>,
}

#[derive(Clone, Debug)]
enum IterInner<'a> {
    Empty,
    One(iter::Once<&'a Identity>),
    Many(slice::Iter<'a, Identity>),
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Identity;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterInner::Empty => None,
            IterInner::One(iter) => iter.next(),
            IterInner::Many(iter) => iter.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokenfed_traits::Policy;

    use super::*;

    const ADMIN: &str = "system:serviceaccount:default:admin-user";

    #[test]
    fn empty_policy_denies_everything() {
        let policy = IdentityPolicy::default();

        assert!(policy.is_deny_all());
        assert!(!policy.permits(IdentityRef::from_str(ADMIN)));
        assert!(!policy.permits(IdentityRef::from_str("")));
    }

    #[test]
    fn exact_match_is_permitted() {
        let policy = IdentityPolicy::allow_one(Identity::from_static(ADMIN));

        assert!(policy.evaluate(IdentityRef::from_str(ADMIN)).is_ok());
    }

    #[test]
    fn near_matches_are_denied() {
        let policy = IdentityPolicy::allow_one(Identity::from_static(ADMIN));

        for caller in [
            "system:serviceaccount:default:admin",
            "system:serviceaccount:default:admin-user2",
            "System:ServiceAccount:default:admin-user",
            " system:serviceaccount:default:admin-user",
            "system:serviceaccount:default:*",
        ] {
            let denial = policy.evaluate(IdentityRef::from_str(caller)).unwrap_err();
            assert_eq!(denial.identity.as_str(), caller);
        }
    }

    #[test]
    fn any_member_of_the_set_is_permitted() {
        let mut policy = IdentityPolicy::deny_all();
        policy.allow(Identity::from_static(ADMIN));
        policy.allow(Identity::from_static("system:serviceaccount:ops:deployer"));

        assert!(policy.permits(IdentityRef::from_str(ADMIN)));
        assert!(policy.permits(IdentityRef::from_str("system:serviceaccount:ops:deployer")));
        assert!(!policy.permits(IdentityRef::from_str("system:serviceaccount:ops:viewer")));
    }

    #[test]
    fn duplicates_are_collapsed() {
        let policy: IdentityPolicy = [ADMIN, ADMIN, ADMIN].into_iter().collect();

        assert_eq!(policy, IdentityPolicy::allow_one(Identity::from_static(ADMIN)));
        assert_eq!(policy.iter().count(), 1);
    }

    #[test]
    fn denial_names_the_identity() {
        let policy = IdentityPolicy::deny_all();

        let denial = policy
            .evaluate(IdentityRef::from_str("system:anonymous"))
            .unwrap_err();

        assert_eq!(denial.to_string(), "identity system:anonymous is not permitted");
    }
}
