//! `#[traced]`: enter/exit trace events, optional elapsed time, optional
//! forwarding to `tracing::instrument`.
//!
//! ```ignore
//! #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
//! async fn deliver(&self) -> Result<(), Error> { ... }
//! ```
//!
//! The expansion refers to `tracing::...` paths, so the calling crate must
//! have `tracing` in scope.

extern crate proc_macro;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    ItemFn, LitStr, Token,
    parse::{Parse, ParseStream},
    parse_macro_input, parse_quote,
};

mod kw {
    syn::custom_keyword!(timing);
    syn::custom_keyword!(precision);
    syn::custom_keyword!(instrument);
}

/// Unit the elapsed time is reported in.
#[derive(Clone, Copy)]
enum Unit {
    Nanos,
    Micros,
    Millis,
    Seconds,
}

impl Unit {
    fn from_lit(lit: &LitStr) -> syn::Result<Self> {
        match lit.value().as_str() {
            "ns" | "nanos" => Ok(Self::Nanos),
            "us" | "micros" => Ok(Self::Micros),
            "ms" | "millis" => Ok(Self::Millis),
            "s" | "secs" => Ok(Self::Seconds),
            other => Err(syn::Error::new(
                lit.span(),
                format!("unknown precision `{other}`, expected one of ns, us, ms, s"),
            )),
        }
    }

    /// An expression rendering `elapsed` (a `Duration` in scope) in this unit.
    fn render(self) -> TokenStream {
        match self {
            Self::Nanos => quote!(format!("{} ns elapsed", elapsed.as_nanos())),
            Self::Micros => quote!(format!("{} us elapsed", elapsed.as_micros())),
            Self::Millis => quote!(format!("{} ms elapsed", elapsed.as_millis())),
            Self::Seconds => quote!(format!("{} s elapsed", elapsed.as_secs())),
        }
    }
}

/// Parsed `#[traced(...)]` arguments.
#[derive(Default)]
struct Options {
    timing: Option<Unit>,
    instrument: Option<TokenStream>,
}

impl Options {
    fn parse_timing(input: ParseStream) -> syn::Result<Unit> {
        let content;
        syn::parenthesized!(content in input);
        content.parse::<kw::precision>()?;
        content.parse::<Token![=]>()?;
        Unit::from_lit(&content.parse()?)
    }

    fn parse_instrument(input: ParseStream) -> syn::Result<TokenStream> {
        if !input.peek(syn::token::Paren) {
            return Ok(TokenStream::new());
        }

        let content;
        syn::parenthesized!(content in input);
        content.parse()
    }
}

impl Parse for Options {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut options = Self::default();

        while !input.is_empty() {
            let lookahead = input.lookahead1();

            if lookahead.peek(kw::timing) {
                let keyword = input.parse::<kw::timing>()?;
                if options.timing.is_some() {
                    return Err(syn::Error::new(keyword.span, "`timing` given twice"));
                }
                options.timing = Some(Self::parse_timing(input)?);
            } else if lookahead.peek(kw::instrument) {
                let keyword = input.parse::<kw::instrument>()?;
                if options.instrument.is_some() {
                    return Err(syn::Error::new(keyword.span, "`instrument` given twice"));
                }
                options.instrument = Some(Self::parse_instrument(input)?);
            } else {
                return Err(lookahead.error());
            }

            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(options)
    }
}

/// Emit `tracing::trace!` events when the attributed function is entered and
/// when it returns, including early returns and `?`.
///
/// - `timing(precision = "ms")` appends the elapsed time to the exit event;
///   `ns`, `us`, `ms` and `s` are accepted.
/// - `instrument(...)` adds `#[tracing::instrument(...)]` with the same
///   arguments.
///
/// For an `async fn` the events mark the first poll and the completion of the
/// returned future.
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let options = parse_macro_input!(args as Options);
    let mut function = parse_macro_input!(item as ItemFn);

    let name = function.sig.ident.to_string();

    let on_exit = options.timing.map_or_else(
        || quote!(tracing::trace!("OnExit: {}", #name);),
        |unit| {
            let render = unit.render();
            quote! {
                let elapsed = self.started.elapsed();
                tracing::trace!("OnExit: {} ({})", #name, #render);
            }
        },
    );

    let guard: syn::Stmt = parse_quote! {
        let __traced = {
            struct Traced {
                #[allow(dead_code)]
                started: std::time::Instant,
            }

            impl Drop for Traced {
                fn drop(&mut self) {
                    #on_exit
                }
            }

            tracing::trace!("OnEnter: {}", #name);
            Traced {
                started: std::time::Instant::now(),
            }
        };
    };
    function.block.stmts.insert(0, guard);

    function
        .attrs
        .push(parse_quote!(#[allow(clippy::items_after_statements)]));

    if let Some(arguments) = options.instrument {
        function
            .attrs
            .push(parse_quote!(#[tracing::instrument(#arguments)]));
    }

    quote!(#function).into()
}
