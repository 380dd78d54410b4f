use conflux_error::ErrorCode;
use conflux_runtime::pool_state::{self, ConnectionPoolStateCache};
use std::sync::Arc;

#[test]
fn test_second_global_install_fails() {
    let first = Arc::new(ConnectionPoolStateCache::default());
    pool_state::install_global(first.clone()).unwrap();

    let err = pool_state::install_global(Arc::new(ConnectionPoolStateCache::default()))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyInitialized);

    let installed = pool_state::global().unwrap();
    assert!(Arc::ptr_eq(&installed, &first));
}
