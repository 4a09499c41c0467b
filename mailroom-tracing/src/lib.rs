//! `#[traced]`: entry/exit tracing for pipeline functions.
//!
//! ```ignore
//! #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "us"))]
//! fn route(&self, reference: ProcessingReference) -> Result<(), PipelineError> { .. }
//! ```
//!
//! `instrument(..)` is forwarded verbatim to `tracing::instrument`. `timing`
//! adds the elapsed wall time to the exit event. The expansion refers to
//! `tracing::` paths, so the calling crate must depend on `tracing`.
#![warn(clippy::pedantic)]

extern crate proc_macro;

use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::{ItemFn, Stmt, parse::Parse, parse_macro_input, parse_quote};

#[derive(PartialEq, Eq, Clone, Copy, Default)]
enum Precision {
    #[default]
    Nanos,
    Micros,
    Millis,
    Seconds,
}

impl Precision {
    /// The expression rendering a `Duration` in this unit
    fn elapsed(self) -> syn::Expr {
        match self {
            Self::Nanos => parse_quote!(format!("{} ns", __elapsed.as_nanos())),
            Self::Micros => parse_quote!(format!("{} us", __elapsed.as_micros())),
            Self::Millis => parse_quote!(format!("{} ms", __elapsed.as_millis())),
            Self::Seconds => parse_quote!(format!("{} s", __elapsed.as_secs())),
        }
    }
}

impl TryFrom<&str> for Precision {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "ns" | "nano" | "nanos" | "nanoseconds" => Ok(Self::Nanos),
            "us" | "micro" | "micros" | "microseconds" => Ok(Self::Micros),
            "ms" | "milli" | "millis" | "milliseconds" => Ok(Self::Millis),
            "s" | "sec" | "secs" | "seconds" => Ok(Self::Seconds),
            other => Err(format!("unknown timing precision `{other}`")),
        }
    }
}

impl Parse for Precision {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        if !input.peek(syn::token::Paren) {
            return Ok(Self::default());
        }

        let content;
        let _ = syn::parenthesized!(content in input);
        let _ = content.parse::<keywords::precision>()?;
        let _ = content.parse::<syn::Token![=]>()?;
        let literal = content.parse::<syn::LitStr>()?;

        Self::try_from(literal.value().as_str())
            .map_err(|reason| syn::Error::new(literal.span(), reason))
    }
}

mod keywords {
    syn::custom_keyword!(timing);
    syn::custom_keyword!(precision);
    syn::custom_keyword!(instrument);
}

#[derive(Default)]
struct Attributes {
    timing: Option<Precision>,
    instrument: Option<TokenStream>,
    unrecognised: Vec<syn::Error>,
}

impl Attributes {
    /// Unknown arguments become deprecation warnings instead of hard errors
    fn warnings(&self) -> TokenStream {
        let warnings = self.unrecognised.iter().map(|err| {
            let note = syn::LitStr::new(&format!("traced: ignored argument, {err}"), err.span());

            quote_spanned! {err.span()=>
                #[warn(deprecated)]
                {
                    #[deprecated(since = "never", note = #note)]
                    const TRACED_IGNORED_ARGUMENT: () = ();
                    let () = TRACED_IGNORED_ARGUMENT;
                }
            }
        });

        quote! { #(#warnings)* }
    }
}

impl Parse for Attributes {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut attributes = Self::default();

        while !input.is_empty() {
            let lookahead = input.lookahead1();
            if lookahead.peek(keywords::timing) {
                if attributes.timing.is_some() {
                    return Err(input.error("`timing` may only be given once"));
                }
                let _ = input.parse::<keywords::timing>()?;
                attributes.timing = Some(input.parse()?);
            } else if lookahead.peek(keywords::instrument) {
                if attributes.instrument.is_some() {
                    return Err(input.error("`instrument` may only be given once"));
                }
                let _ = input.parse::<keywords::instrument>()?;
                if input.peek(syn::token::Paren) {
                    let content;
                    let _ = syn::parenthesized!(content in input);
                    attributes.instrument = Some(content.parse()?);
                } else {
                    attributes.instrument = Some(TokenStream::new());
                }
            } else if lookahead.peek(syn::Token![,]) {
                let _ = input.parse::<syn::Token![,]>()?;
            } else {
                attributes.unrecognised.push(lookahead.error());
                let _ = input.parse::<proc_macro2::TokenTree>();
            }
        }

        Ok(attributes)
    }
}

/// Emits `trace` events when the attributed function is entered and left.
///
/// # Panics
///
/// When applied to anything other than a function.
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let args = parse_macro_input!(args as Attributes);
    let mut item_fn = parse_macro_input!(item as ItemFn);
    let warnings = args.warnings();

    item_fn
        .attrs
        .push(parse_quote! { #[allow(clippy::items_after_statements)] });

    if let Some(fields) = &args.instrument {
        item_fn
            .attrs
            .push(parse_quote! { #[tracing::instrument(#fields)] });
    }

    let id = item_fn.sig.ident.to_string();
    let on_exit: Stmt = match args.timing {
        None => parse_quote! { tracing::trace!("exit: {}", #id); },
        Some(precision) => {
            let elapsed = precision.elapsed();
            parse_quote! {
                {
                    let __elapsed = self.started.elapsed();
                    tracing::trace!("exit: {} ({} elapsed)", #id, #elapsed);
                }
            }
        }
    };

    let guard: Vec<Stmt> = parse_quote! {
        #[allow(dead_code)]
        struct __Traced {
            started: std::time::Instant,
        }

        impl __Traced {
            fn enter() -> Self {
                #warnings

                tracing::trace!("enter: {}", #id);
                Self {
                    started: std::time::Instant::now(),
                }
            }
        }

        impl std::ops::Drop for __Traced {
            fn drop(&mut self) {
                #on_exit
            }
        }

        let __traced = __Traced::enter();
    };

    let body = std::mem::take(&mut item_fn.block.stmts);
    item_fn.block.stmts = guard.into_iter().chain(body).collect();

    quote! { #item_fn }.into()
}
