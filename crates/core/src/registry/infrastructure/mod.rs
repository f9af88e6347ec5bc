pub mod cosine_comparator;
