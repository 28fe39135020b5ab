use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that the engine is disposed regardless of how the test terminates.
///
/// Injectable dependencies are `crate::ledger::fake::FakeLedger`,
/// `crate::sync::Engine` (already initialised against that ledger), and
/// [`rocket::local::asynchronous::Client`] (serving that engine).
///
/// `#[ledger_test(active)]` starts the ledger with an election running.
#[proc_macro_attribute]
pub fn ledger_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let injected = match check_sig(item_fn.sig.clone()) {
        Ok(injected) => injected,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Pick the starting state of the ledger.
    let ledger_example = match parse_macro_input!(args as Option<Ident>) {
        None => quote! { example },
        Some(arg) if arg == "active" => quote! { active_example },
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected `active` or no argument")
                .into_compile_error()
                .into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    let maybe_init = (injected.engine || injected.client).then(|| {
        quote! {
            engine.init();
        }
    });
    let maybe_client = injected.client.then(|| {
        quote! {
            let rocket_client = rocket::local::asynchronous::Client::tracked(
                crate::rocket_for_engine(engine.clone()),
            )
            .await
            .unwrap();
        }
    });
    let test_args = injected.args;

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("ledger-test-worker")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Test setup.
            log4rs_test_utils::test_logging::init_logging_once_for(["ballot_sync"], None, None);
            let ledger = crate::ledger::fake::FakeLedger::#ledger_example();
            let engine = crate::sync::Engine::new(
                std::sync::Arc::new(ledger.clone()),
                crate::sync::EngineSettings::for_tests(),
            );

            // Run the test, catching any panics so the engine is always stopped.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                runtime.block_on(async {
                    #maybe_init
                    #maybe_client
                    #new_name(#(#test_args),*).await
                })
            }));

            // Test cleanup.
            engine.dispose();
            drop(runtime);

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::resume_unwind(cause);
            }
        }
    }
    .into()
}

struct Injected {
    args: Vec<TokenStream2>,
    engine: bool,
    client: bool,
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Injected, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut injected = Injected {
        args: vec![],
        engine: false,
        client: false,
    };
    let mut has_ledger = false;

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                if let Some(type_ident) = type_path.path.get_ident() {
                    let (seen, arg) = if type_ident == "FakeLedger" {
                        (&mut has_ledger, quote! { ledger.clone() })
                    } else if type_ident == "Engine" {
                        (&mut injected.engine, quote! { engine.clone() })
                    } else if type_ident == "Client" {
                        (&mut injected.client, quote! { rocket_client })
                    } else {
                        return Err(unexpected(input));
                    };
                    if *seen {
                        return Err(syn::Error::new(
                            input.span(),
                            format!("Test cannot accept more than one `{type_ident}`"),
                        ));
                    }
                    *seen = true;
                    injected.args.push(arg);
                    continue;
                }
            }
        }

        return Err(unexpected(input));
    }

    Ok(injected)
}

fn unexpected(input: &FnArg) -> syn::Error {
    syn::Error::new(
        input.span(),
        "Expected one of `ledger_ident: FakeLedger`, `engine_ident: Engine` or `client_ident: Client`",
    )
}
