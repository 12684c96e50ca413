//! `#[test_timeout::timeout]` bounds a test with a wall-clock limit.
//!
//! The harness spawns real child processes in its tests; a candidate that
//! never answers must fail the test instead of wedging `cargo test`. The
//! attribute accepts an optional limit in seconds (default 60) and works on
//! both plain and `async` test functions. Async bodies run on a fresh
//! current-thread tokio runtime, so callers must depend on `tokio` with the
//! `rt` and `time` features.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let timeout_secs = match parse_timeout(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if !sig.inputs.is_empty() {
        return syn::Error::new_spanned(&sig.inputs, "timeout tests cannot take arguments")
            .to_compile_error()
            .into();
    }

    let is_async = sig.asyncness.take().is_some();
    let thread_name = format!("{}-body", sig.ident);
    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_marker(attr))
        .collect();

    let body: TokenStream2 = if is_async {
        quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build tokio runtime for test");
            runtime.block_on(async move #block)
        }
    } else {
        quote! { #block }
    };

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let limit = std::time::Duration::from_secs(#timeout_secs);
            let (sender, receiver) = std::sync::mpsc::channel();
            let worker = std::thread::Builder::new()
                .name(#thread_name.to_string())
                .spawn(move || {
                    let outcome = std::panic::catch_unwind(
                        std::panic::AssertUnwindSafe(move || { #body }),
                    );
                    let _ = sender.send(outcome);
                })
                .expect("failed to spawn test thread");
            match receiver.recv_timeout(limit) {
                Ok(Ok(value)) => {
                    let _ = worker.join();
                    value
                }
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded its {}s limit", #timeout_secs)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting a result")
                }
            }
        }
    })
}

fn parse_timeout(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(secs)
}

/// `#[test]` and `#[tokio::test]` are dropped; the expansion adds its own `#[test]`.
fn is_test_marker(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
