pub mod persistence {
    pub mod directory_store;
    pub mod record_codec;
}

pub mod registry {
    pub mod domain {
        pub mod identity_record;
        pub mod match_result;
        pub mod template_comparator;
    }
    pub mod identity_registry;
    pub mod infrastructure;
    pub mod registry_error;
}

pub mod shared {
    pub mod constants;
    pub mod identity_key;
    pub mod template;
}
