#![cfg(test)]

use axum::{extract::FromRequestParts, http};
use confab_api::Error as ApiError;
use std::panic::AssertUnwindSafe;

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

do_tokio_test!(
    fuzz_preauth_accepts_any_valid_bearer,
    u128,
    |token| async move {
        let token = confab_api::Uuid::from_u128(token);
        let mut req = http::Request::builder()
            .method(http::Method::GET)
            .uri("/")
            .header(http::header::AUTHORIZATION, format!("bearer {token}"))
            .body(())
            .expect("building request")
            .into_parts()
            .0;
        match PreAuth::from_request_parts(&mut req, &()).await {
            Ok(PreAuth(t)) => assert_eq!(t.0, token),
            Err(e) => panic!("valid bearer token was rejected: {e}"),
        }
    }
);
