use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::{Expr, ItemFn, MetaNameValue, Token, parse_macro_input};

/// Attribute macro for tests that need tracing output.
///
/// Sync functions become `#[test]`, async functions become `#[tokio::test]`.
/// Arguments are forwarded to `tokio::test` (for example `start_paused = true`)
/// except `timeout_secs = N`, which bounds the whole async body.
///
/// ```ignore
/// #[solo::test(start_paused = true, timeout_secs = 30)]
/// async fn lease_expires() { ... }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr with Punctuated::<MetaNameValue, Token![,]>::parse_terminated);
    let input = parse_macro_input!(item as ItemFn);
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = &input.sig.ident;

    let mut timeout: Option<Expr> = None;
    let mut forwarded = Vec::new();
    for arg in args {
        if arg.path.is_ident("timeout_secs") {
            timeout = Some(arg.value);
        } else {
            forwarded.push(arg);
        }
    }

    let tokio_args = if forwarded.is_empty() {
        quote! {}
    } else {
        quote! { ( #(#forwarded),* ) }
    };

    let output = if sig.asyncness.is_some() {
        let body = match timeout {
            Some(secs) => quote! {
                tokio::time::timeout(
                    std::time::Duration::from_secs(#secs),
                    async move { #block },
                )
                .await
                .expect(concat!(stringify!(#name), " timed out"))
            },
            None => quote! { async move { #block }.await },
        };
        quote! {
            #[tokio::test #tokio_args]
            #vis #sig {
                solo::trace::with_test_tracing(stringify!(#name), || async move { #body }).await
            }
        }
    } else {
        quote! {
            #[test]
            #vis #sig {
                solo::trace::with_test_tracing_sync(stringify!(#name), || { #block })
            }
        }
    };
    output.into()
}
