//! Plan-time policies.
//!
//! Policies run after defaults are applied and before replacement paths are
//! computed. They read the prior and proposed trees, may fill derived computed
//! attributes in the planned tree, and never perform I/O.

use std::fmt;

use crate::attribute::{AttributePath, AttributeTree, AttributeValue, Presence};
use crate::error::{Error, Result};

/// Computes a derived attribute from the planned tree. `None` leaves the
/// attribute untouched.
pub type DeriveFn = fn(&AttributeTree) -> Result<Option<AttributeValue>>;

/// Free-form plan callback.
pub type CustomizeDiffFn = fn(&mut PlanContext<'_>) -> Result<()>;

/// Trees visible to a policy.
#[derive(Debug)]
pub struct PlanContext<'a> {
    /// Resource type name
    pub type_name: &'a str,
    /// Prior state, `None` on create
    pub prior: Option<&'a AttributeTree>,
    /// Planned state, after defaults
    pub planned: &'a mut AttributeTree,
}

impl PlanContext<'_> {
    /// Returns true when planning a create.
    #[must_use]
    pub fn is_create(&self) -> bool {
        self.prior.is_none()
    }

    /// Value at a dotted path in the planned tree.
    #[must_use]
    pub fn planned_value(&self, dotted: &str) -> &AttributeValue {
        self.planned
            .get_path(&AttributePath::parse(dotted))
            .unwrap_or(&AttributeValue::Null)
    }

    /// Returns true when the user set a non-zero value at the path.
    #[must_use]
    pub fn is_set(&self, dotted: &str) -> bool {
        self.planned_value(dotted).presence() == Presence::Set
    }

    /// Returns true when the value at the path differs from the prior state.
    /// Always false on create.
    #[must_use]
    pub fn has_change(&self, dotted: &str) -> bool {
        let path = AttributePath::parse(dotted);
        self.prior.is_some_and(|prior| {
            let before = prior.get_path(&path).unwrap_or(&AttributeValue::Null);
            let after = self.planned.get_path(&path).unwrap_or(&AttributeValue::Null);
            before != after
        })
    }
}

/// A plan-time rule.
#[derive(Clone)]
pub enum Policy {
    /// `attribute` is required when `when` equals `equals`, and rejected
    /// otherwise.
    RequiredWhen {
        /// Dependent attribute
        attribute: &'static str,
        /// Controlling attribute
        when: &'static str,
        /// Triggering value
        equals: &'static str,
    },
    /// At most one of the two attributes may be set.
    ConflictsWith {
        /// First attribute
        first: &'static str,
        /// Second attribute
        second: &'static str,
    },
    /// At least one of the attributes must be set.
    AtLeastOneOf(&'static [&'static str]),
    /// The attribute may not change once created.
    ForbidChange {
        /// Attribute path
        attribute: &'static str,
        /// Error message
        message: &'static str,
    },
    /// At most one of the paths may be set, with a custom message.
    ExclusiveBlocks {
        /// Mutually exclusive paths
        members: &'static [&'static str],
        /// Error message
        message: &'static str,
    },
    /// Fills a computed attribute.
    Derive {
        /// Target attribute
        target: &'static str,
        /// Derivation
        compute: DeriveFn,
    },
    /// Free-form callback.
    Custom(CustomizeDiffFn),
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequiredWhen {
                attribute,
                when,
                equals,
            } => write!(f, "RequiredWhen({attribute} iff {when} = {equals})"),
            Self::ConflictsWith { first, second } => write!(f, "ConflictsWith({first}, {second})"),
            Self::AtLeastOneOf(names) => write!(f, "AtLeastOneOf({})", names.join(", ")),
            Self::ForbidChange { attribute, .. } => write!(f, "ForbidChange({attribute})"),
            Self::ExclusiveBlocks { members, .. } => write!(f, "ExclusiveBlocks({})", members.join(", ")),
            Self::Derive { target, .. } => write!(f, "Derive({target})"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl Policy {
    /// Evaluates the policy.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending attribute.
    pub fn evaluate(&self, ctx: &mut PlanContext<'_>) -> Result<()> {
        match self {
            Self::RequiredWhen {
                attribute,
                when,
                equals,
            } => {
                let triggered = ctx.planned_value(when).as_str() == Some(*equals);
                let present = ctx.planned_value(attribute).presence() != Presence::Absent;
                if triggered && !present {
                    return Err(Error::config_invalid_at(
                        AttributePath::parse(attribute),
                        format!("{attribute} is required when {when} is {equals}"),
                    ));
                }
                if !triggered && present {
                    return Err(Error::config_invalid_at(
                        AttributePath::parse(attribute),
                        format!("{attribute} can only be set when {when} is {equals}"),
                    ));
                }
                Ok(())
            }
            Self::ConflictsWith { first, second } => {
                if ctx.is_set(first) && ctx.is_set(second) {
                    return Err(Error::config_invalid_at(
                        AttributePath::parse(second),
                        format!("only one of {first} or {second} can be specified"),
                    ));
                }
                Ok(())
            }
            Self::AtLeastOneOf(names) => {
                if names.iter().any(|name| ctx.is_set(name)) {
                    Ok(())
                } else {
                    Err(Error::config_invalid(format!(
                        "one of {} must be specified",
                        names.join(" or ")
                    )))
                }
            }
            Self::ForbidChange { attribute, message } => {
                if ctx.has_change(attribute) {
                    return Err(Error::config_invalid_at(AttributePath::parse(attribute), *message));
                }
                Ok(())
            }
            Self::ExclusiveBlocks { members, message } => {
                let set = members.iter().filter(|member| ctx.is_set(member)).count();
                if set > 1 {
                    return Err(Error::config_invalid_at(block_root(members[0]), *message));
                }
                Ok(())
            }
            Self::Derive { target, compute } => {
                if let Some(value) = compute(&*ctx.planned)? {
                    ctx.planned.set_path(&AttributePath::parse(target), value)?;
                }
                Ok(())
            }
            Self::Custom(callback) => callback(ctx),
        }
    }
}

/// Top-level attribute of a dotted path.
fn block_root(dotted: &str) -> AttributePath {
    let path = AttributePath::parse(dotted);
    match path.root_attribute() {
        Some(root) => AttributePath::attr(root.to_string()),
        None => path,
    }
}

/// Evaluates every policy and collects the errors.
#[must_use]
pub fn evaluate_all(policies: &[Policy], ctx: &mut PlanContext<'_>) -> Vec<Error> {
    policies
        .iter()
        .filter_map(|policy| policy.evaluate(ctx).err())
        .collect()
}
