//! `#[tap_test]` attribute for the wifi-provisioning-esp32 device test image.
//!
//! Annotated functions stay ordinary functions and are additionally
//! registered with the TAP harness in `wifi_provisioning_esp32::testing`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType};

/// Register a function as a TAP test.
///
/// The function either returns nothing (a panic is a failure) or a
/// `Result<(), E>` (an `Err` is a failure).
///
/// - `#[tap_test]`
/// - `#[tap_test(should_panic)]`
/// - `#[tap_test(should_panic = "message")]` - panic text must contain `message`
///
/// ```ignore
/// use wifi_provisioning_esp32_macros::tap_test;
///
/// #[tap_test]
/// fn form_parses() {
///     let form = parse_credential_form(b"ssid=lab-iot&ipass=IoT-IoT-IoT").unwrap();
///     assert_eq!(form.ssid, "lab-iot");
/// }
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);

    let should_panic = match parse_should_panic(attr) {
        Ok(should_panic) => should_panic,
        Err(e) => return e.to_compile_error().into(),
    };

    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let returns_result = matches!(input_fn.sig.output, ReturnType::Type(_, _));

    let register_call: TokenStream2 = match should_panic {
        ShouldPanic::No if returns_result => quote! {
            runner.run(#fn_name_str, #fn_name);
        },
        ShouldPanic::No => quote! {
            runner.run_assert(#fn_name_str, #fn_name);
        },
        ShouldPanic::Yes => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, None);
        },
        ShouldPanic::WithMessage(msg) => quote! {
            runner.run_should_panic(#fn_name_str, #fn_name, Some(#msg));
        },
    };

    let expanded = quote! {
        #input_fn

        ::wifi_provisioning_esp32::testing::inventory::submit! {
            ::wifi_provisioning_esp32::testing::TapTestEntry::new(
                #fn_name_str,
                |runner: &mut ::wifi_provisioning_esp32::testing::TestRunner| {
                    #register_call
                }
            )
        }
    };

    TokenStream::from(expanded)
}

enum ShouldPanic {
    No,
    Yes,
    WithMessage(String),
}

fn parse_should_panic(attr: TokenStream) -> syn::Result<ShouldPanic> {
    if attr.is_empty() {
        return Ok(ShouldPanic::No);
    }

    let meta: Meta = syn::parse(attr)?;
    if !meta.path().is_ident("should_panic") {
        return Err(syn::Error::new_spanned(
            meta.path(),
            "tap_test: unknown attribute, supported: should_panic, should_panic = \"message\"",
        ));
    }

    match meta {
        Meta::Path(_) => Ok(ShouldPanic::Yes),
        Meta::NameValue(nv) => match nv.value {
            Expr::Lit(ExprLit {
                lit: Lit::Str(s), ..
            }) => Ok(ShouldPanic::WithMessage(s.value())),
            other => Err(syn::Error::new_spanned(
                other,
                "tap_test: should_panic expects a string literal",
            )),
        },
        Meta::List(list) => Err(syn::Error::new_spanned(
            list,
            "tap_test: use #[tap_test(should_panic)] or #[tap_test(should_panic = \"message\")]",
        )),
    }
}
