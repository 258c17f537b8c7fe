//! Derive macros for ticket exchange action enums
//!
//! A reducer's action enum mixes three roles: commands sent by callers,
//! events published after a commit, and feedback produced by effects. This
//! crate derives the classification helpers so the reducer and the store
//! logging can tell them apart without hand-written matches.
//!
//! # Example
//!
//! ```ignore
//! use ticket_exchange_macros::Action;
//!
//! #[derive(Action, Clone, Debug)]
//! enum TicketAction {
//!     #[command]
//!     BuyTicket { ticket_id: TicketId },
//!
//!     #[event]
//!     TicketPurchased { ticket_id: TicketId },
//!
//!     #[feedback]
//!     SettlementFailed { reason: String },
//! }
//!
//! assert!(TicketAction::BuyTicket { ticket_id }.is_command());
//! assert_eq!(purchased.event_type(), "TicketPurchased.v1");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Variant};

const ROLES: [&str; 3] = ["command", "event", "feedback"];

/// Derive macro for action enums
///
/// Generates, on the enum itself:
/// - `is_command()`, `is_event()`, `is_feedback()`
/// - `event_type()`: versioned name of an event (`"Variant.v1"`), `"unknown"` otherwise
/// - `action_name()`: bare variant name, usable as a log or metric label
///
/// # Attributes
///
/// - `#[command]` - request to change state
/// - `#[event]` - fact published after a commit
/// - `#[feedback]` - outcome of an effect, fed back into the reducer
///
/// A variant carries at most one role. Unmarked variants report `false` for
/// all three.
#[proc_macro_derive(Action, attributes(command, event, feedback))]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_action(&input) {
        Ok(tokens) => tokens.into(),
        Err(error) => error.to_compile_error().into(),
    }
}

fn expand_action(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;

    let Data::Enum(data_enum) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "#[derive(Action)] can only be used on enums",
        ));
    };

    let mut command_arms = Vec::new();
    let mut event_arms = Vec::new();
    let mut feedback_arms = Vec::new();
    let mut event_type_arms = Vec::new();
    let mut name_arms = Vec::new();

    for variant in &data_enum.variants {
        let pattern = variant_pattern(variant);
        let label = variant.ident.to_string();
        name_arms.push(quote! { #pattern => #label, });

        match role_of(variant)? {
            Some("command") => command_arms.push(quote! { #pattern => true, }),
            Some("event") => {
                let type_name = format!("{label}.v1");
                event_arms.push(quote! { #pattern => true, });
                event_type_arms.push(quote! { #pattern => #type_name, });
            },
            Some(_) => feedback_arms.push(quote! { #pattern => true, }),
            None => {},
        }
    }

    Ok(quote! {
        impl #name {
            /// Returns true if this action is a command
            #[must_use]
            #[allow(unreachable_patterns)]
            pub const fn is_command(&self) -> bool {
                match self {
                    #(#command_arms)*
                    _ => false,
                }
            }

            /// Returns true if this action is an event
            #[must_use]
            #[allow(unreachable_patterns)]
            pub const fn is_event(&self) -> bool {
                match self {
                    #(#event_arms)*
                    _ => false,
                }
            }

            /// Returns true if this action is effect feedback
            #[must_use]
            #[allow(unreachable_patterns)]
            pub const fn is_feedback(&self) -> bool {
                match self {
                    #(#feedback_arms)*
                    _ => false,
                }
            }

            /// Returns the versioned event type name
            ///
            /// Only events have type names. Other actions return "unknown".
            #[must_use]
            #[allow(unreachable_patterns)]
            pub const fn event_type(&self) -> &'static str {
                match self {
                    #(#event_type_arms)*
                    _ => "unknown",
                }
            }

            /// Returns the variant name
            #[must_use]
            pub const fn action_name(&self) -> &'static str {
                match self {
                    #(#name_arms)*
                }
            }
        }
    })
}

/// Pattern matching the variant regardless of its payload
fn variant_pattern(variant: &Variant) -> TokenStream2 {
    let ident = &variant.ident;
    match &variant.fields {
        Fields::Named(_) => quote! { Self::#ident { .. } },
        Fields::Unnamed(_) => quote! { Self::#ident(..) },
        Fields::Unit => quote! { Self::#ident },
    }
}

/// The single role attribute on a variant, if any
fn role_of(variant: &Variant) -> syn::Result<Option<&'static str>> {
    let mut roles = ROLES.iter().copied().filter(|role| has_attribute(&variant.attrs, role));
    let first = roles.next();
    if roles.next().is_some() {
        return Err(syn::Error::new_spanned(
            variant,
            "Variant can carry only one of #[command], #[event] or #[feedback]",
        ));
    }
    Ok(first)
}

fn has_attribute(attrs: &[Attribute], name: &str) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident(name))
}
